//! Endpoint classes and per-service health candidates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::colima::DEFAULT_COLIMA_VM_IP;

/// Default Kubernetes namespace for cluster-DNS candidates.
pub const DEFAULT_NAMESPACE: &str = "joelclaw";

/// Default health path for services without a known probe table entry.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Where a dependent service may be running relative to the caller, in
/// precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    /// Port-forwarded or natively running on this host.
    Localhost,
    /// Reachable on the Colima VM's address.
    Vm,
    /// In-cluster service DNS name.
    SvcDns,
}

impl EndpointClass {
    /// Every class, in probe order.
    pub const ALL: [EndpointClass; 3] = [Self::Localhost, Self::Vm, Self::SvcDns];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Localhost => "localhost",
            Self::Vm => "vm",
            Self::SvcDns => "svc_dns",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint class and the URLs to try for it, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointCandidate {
    pub endpoint_class: EndpointClass,
    pub probe_urls: Vec<String>,
}

/// Port and health paths for a service the bus talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownService {
    pub name: &'static str,
    pub port: u16,
    /// Tried in order; some services answer on one route but not the other
    /// depending on version.
    pub paths: &'static [&'static str],
}

/// Services with a fixed probe table.
pub const KNOWN_SERVICES: &[KnownService] = &[
    KnownService {
        name: "inngest",
        port: 8288,
        paths: &["/health", "/v1/health"],
    },
    KnownService {
        name: "typesense",
        port: 8108,
        paths: &["/health"],
    },
    KnownService {
        name: "worker",
        port: 3111,
        paths: &["/api/inngest", "/health"],
    },
];

pub fn known_service(name: &str) -> Option<&'static KnownService> {
    KNOWN_SERVICES.iter().find(|s| s.name == name)
}

/// Overrides for [`build_service_health_candidates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOptions {
    /// VM address. Falls back to [`DEFAULT_COLIMA_VM_IP`].
    pub vm_ip: Option<String>,
    pub namespace: String,
    /// Replaces the known port; required for unknown services.
    pub port: Option<u16>,
    /// Replaces the known health paths.
    pub paths: Option<Vec<String>>,
}

impl Default for CandidateOptions {
    fn default() -> Self {
        Self {
            vm_ip: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            port: None,
            paths: None,
        }
    }
}

/// Builds the `localhost → vm → svc_dns` candidates for `service`.
///
/// Returns an empty list for an unknown service with no port override; the
/// resolver reports that as `no endpoint candidates`.
pub fn build_service_health_candidates(
    service: &str,
    options: &CandidateOptions,
) -> Vec<EndpointCandidate> {
    let known = known_service(service);
    let Some(port) = options.port.or(known.map(|k| k.port)) else {
        return Vec::new();
    };
    let paths: Vec<String> = match (&options.paths, known) {
        (Some(paths), _) if !paths.is_empty() => paths.clone(),
        (_, Some(known)) => known.paths.iter().map(|p| p.to_string()).collect(),
        _ => vec![DEFAULT_HEALTH_PATH.to_string()],
    };

    let vm_ip = options.vm_ip.as_deref().unwrap_or(DEFAULT_COLIMA_VM_IP);
    let svc_host = format!("{service}-svc.{}.svc.cluster.local", options.namespace);

    EndpointClass::ALL
        .into_iter()
        .map(|endpoint_class| {
            let host = match endpoint_class {
                EndpointClass::Localhost => "localhost",
                EndpointClass::Vm => vm_ip,
                EndpointClass::SvcDns => svc_host.as_str(),
            };
            EndpointCandidate {
                endpoint_class,
                probe_urls: paths
                    .iter()
                    .map(|path| format!("http://{host}:{port}{}", normalize_path(path)))
                    .collect(),
            }
        })
        .collect()
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inngest_candidates_walk_both_health_routes_per_class() {
        let options = CandidateOptions {
            vm_ip: Some("192.168.5.15".to_string()),
            ..CandidateOptions::default()
        };
        let candidates = build_service_health_candidates("inngest", &options);

        let classes: Vec<_> = candidates.iter().map(|c| c.endpoint_class).collect();
        assert_eq!(classes, EndpointClass::ALL);
        assert_eq!(
            candidates[0].probe_urls,
            ["http://localhost:8288/health", "http://localhost:8288/v1/health"]
        );
        assert_eq!(candidates[1].probe_urls[0], "http://192.168.5.15:8288/health");
        assert_eq!(
            candidates[2].probe_urls[1],
            "http://inngest-svc.joelclaw.svc.cluster.local:8288/v1/health"
        );
    }

    #[test]
    fn vm_falls_back_to_default_ip() {
        let candidates = build_service_health_candidates("typesense", &CandidateOptions::default());
        assert_eq!(
            candidates[1].probe_urls,
            [format!("http://{DEFAULT_COLIMA_VM_IP}:8108/health")]
        );
    }

    #[test]
    fn overrides_replace_port_and_paths() {
        let options = CandidateOptions {
            namespace: "staging".to_string(),
            port: Some(6380),
            paths: Some(vec!["ping".to_string()]),
            ..CandidateOptions::default()
        };
        let candidates = build_service_health_candidates("redis-http", &options);
        assert_eq!(candidates[0].probe_urls, ["http://localhost:6380/ping"]);
        assert_eq!(
            candidates[2].probe_urls,
            ["http://redis-http-svc.staging.svc.cluster.local:6380/ping"]
        );
    }

    #[test]
    fn unknown_service_without_port_has_no_candidates() {
        let candidates = build_service_health_candidates("mystery", &CandidateOptions::default());
        assert!(candidates.is_empty());
    }

    #[test]
    fn class_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&EndpointClass::SvcDns).unwrap(), "\"svc_dns\"");
    }
}
