//! Ordered endpoint resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{EndpointCandidate, EndpointClass, ProbeClient, ProbeError};

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Options for [`resolve_endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Hard upper bound on each individual probe.
    pub timeout: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// A class that was tried and abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedCandidate {
    pub endpoint_class: EndpointClass,
    /// Failure of the class's last probe URL.
    pub reason: String,
}

/// Outcome of [`resolve_endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum EndpointResolution {
    Resolved {
        endpoint_class: EndpointClass,
        probe_url: String,
        /// Classes abandoned before this one succeeded.
        skipped_candidates: Vec<SkippedCandidate>,
    },
    Unresolved {
        reason: String,
        skipped_candidates: Vec<SkippedCandidate>,
    },
}

impl EndpointResolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn skipped_candidates(&self) -> &[SkippedCandidate] {
        match self {
            Self::Resolved {
                skipped_candidates, ..
            }
            | Self::Unresolved {
                skipped_candidates, ..
            } => skipped_candidates,
        }
    }
}

/// Probes each candidate's URLs in declared order and returns the first that
/// answers 2xx.
///
/// A class is abandoned only after every one of its URLs has failed, and a
/// later class is never probed while an earlier one could still succeed.
/// Each probe is cut off after `options.timeout`, so total time is bounded by
/// the number of URLs times the timeout.
pub async fn resolve_endpoint(
    candidates: &[EndpointCandidate],
    options: &ResolveOptions,
    client: &dyn ProbeClient,
) -> EndpointResolution {
    if candidates.is_empty() {
        return EndpointResolution::Unresolved {
            reason: "no endpoint candidates".to_string(),
            skipped_candidates: Vec::new(),
        };
    }

    let mut skipped = Vec::new();
    for candidate in candidates {
        let mut last_error = "no probe urls".to_string();
        for url in &candidate.probe_urls {
            match probe_once(client, url, options.timeout).await {
                Ok(()) => {
                    info!(
                        endpoint_class = %candidate.endpoint_class,
                        probe_url = %url,
                        "Resolved endpoint"
                    );
                    return EndpointResolution::Resolved {
                        endpoint_class: candidate.endpoint_class,
                        probe_url: url.clone(),
                        skipped_candidates: skipped,
                    };
                }
                Err(e) => {
                    debug!(
                        endpoint_class = %candidate.endpoint_class,
                        probe_url = %url,
                        error = %e,
                        "Probe failed"
                    );
                    last_error = e.to_string();
                }
            }
        }
        skipped.push(SkippedCandidate {
            endpoint_class: candidate.endpoint_class,
            reason: last_error,
        });
    }

    let reason = format!(
        "no healthy endpoint after trying {}",
        skipped
            .iter()
            .map(|s| format!("{} ({})", s.endpoint_class, s.reason))
            .collect::<Vec<_>>()
            .join(", ")
    );
    warn!(%reason, "Endpoint resolution exhausted");
    EndpointResolution::Unresolved {
        reason,
        skipped_candidates: skipped,
    }
}

async fn probe_once(
    client: &dyn ProbeClient,
    url: &str,
    timeout: Duration,
) -> Result<(), ProbeError> {
    let status = tokio::time::timeout(timeout, client.probe(url))
        .await
        .map_err(|_| ProbeError::Timeout {
            after_ms: timeout.as_millis(),
        })??;
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ProbeError::Status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_service_health_candidates, CandidateOptions};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Scripted {
        Status(u16),
        Fail(ProbeError),
        Hang,
    }

    /// Answers each URL from a script; unscripted URLs refuse the connection.
    #[derive(Default)]
    struct ScriptedProbe {
        script: HashMap<String, Scripted>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn with(mut self, url: &str, answer: Scripted) -> Self {
            self.script.insert(url.to_string(), answer);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProbeClient for ScriptedProbe {
        async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.script.get(url).cloned() {
                Some(Scripted::Status(code)) => Ok(code),
                Some(Scripted::Fail(e)) => Err(e),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(200)
                }
                None => Err(ProbeError::Connect {
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn single_path_candidates() -> Vec<EndpointCandidate> {
        build_service_health_candidates("typesense", &CandidateOptions::default())
    }

    #[tokio::test]
    async fn falls_through_to_vm_without_touching_svc_dns() {
        let candidates = single_path_candidates();
        let localhost = candidates[0].probe_urls[0].clone();
        let vm = candidates[1].probe_urls[0].clone();
        let client = ScriptedProbe::default().with(&vm, Scripted::Status(200));

        let resolution = resolve_endpoint(&candidates, &ResolveOptions::default(), &client).await;

        assert_eq!(client.calls(), [localhost, vm.clone()]);
        match resolution {
            EndpointResolution::Resolved {
                endpoint_class,
                probe_url,
                skipped_candidates,
            } => {
                assert_eq!(endpoint_class, EndpointClass::Vm);
                assert_eq!(probe_url, vm);
                assert_eq!(skipped_candidates.len(), 1);
                assert_eq!(skipped_candidates[0].endpoint_class, EndpointClass::Localhost);
                assert!(skipped_candidates[0].reason.contains("connection refused"));
            }
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhaustion_names_every_class() {
        let candidates = single_path_candidates();
        let client = ScriptedProbe::default()
            .with(&candidates[1].probe_urls[0], Scripted::Status(503))
            .with(
                &candidates[2].probe_urls[0],
                Scripted::Fail(ProbeError::Other {
                    message: "dns error".to_string(),
                }),
            );

        let resolution = resolve_endpoint(&candidates, &ResolveOptions::default(), &client).await;

        let EndpointResolution::Unresolved {
            reason,
            skipped_candidates,
        } = resolution
        else {
            panic!("expected exhaustion");
        };
        for class in ["localhost", "vm", "svc_dns"] {
            assert!(reason.contains(class), "{reason}");
        }
        assert_eq!(skipped_candidates.len(), 3);
        assert_eq!(skipped_candidates[1].reason, "HTTP 503");
        assert_eq!(skipped_candidates[2].reason, "dns error");
    }

    #[tokio::test]
    async fn every_path_of_a_class_is_tried_before_moving_on() {
        let candidates = build_service_health_candidates("inngest", &CandidateOptions::default());
        let second_local = candidates[0].probe_urls[1].clone();
        let client = ScriptedProbe::default()
            .with(&candidates[0].probe_urls[0], Scripted::Status(404))
            .with(&second_local, Scripted::Status(204));

        let resolution = resolve_endpoint(&candidates, &ResolveOptions::default(), &client).await;

        assert_eq!(client.calls().len(), 2);
        assert_eq!(
            resolution,
            EndpointResolution::Resolved {
                endpoint_class: EndpointClass::Localhost,
                probe_url: second_local,
                skipped_candidates: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn hung_probe_is_cut_off_by_timeout() {
        let candidates = single_path_candidates();
        let client = ScriptedProbe::default()
            .with(&candidates[0].probe_urls[0], Scripted::Hang)
            .with(&candidates[1].probe_urls[0], Scripted::Status(200));
        let options = ResolveOptions {
            timeout: Duration::from_millis(50),
        };

        let started = std::time::Instant::now();
        let resolution = resolve_endpoint(&candidates, &options, &client).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(resolution.is_resolved());
        assert_eq!(resolution.skipped_candidates()[0].reason, "timed out after 50ms");
    }

    #[tokio::test]
    async fn empty_inputs_are_unresolved_with_clear_reasons() {
        let client = ScriptedProbe::default();
        let resolution = resolve_endpoint(&[], &ResolveOptions::default(), &client).await;
        assert!(matches!(
            resolution,
            EndpointResolution::Unresolved { ref reason, .. } if reason == "no endpoint candidates"
        ));

        let bare = [EndpointCandidate {
            endpoint_class: EndpointClass::Localhost,
            probe_urls: Vec::new(),
        }];
        let resolution = resolve_endpoint(&bare, &ResolveOptions::default(), &client).await;
        assert_eq!(resolution.skipped_candidates()[0].reason, "no probe urls");
        assert!(client.calls().is_empty());
    }
}
