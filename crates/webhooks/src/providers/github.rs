//! GitHub webhook adapter.
//!
//! Only two kinds of delivery produce events:
//!
//! - `workflow_run` with action `completed` → `github/workflow_run.completed`
//! - `package` / `registry_package` with action `published` → `github/package.published`
//!
//! Everything else (queued/in-progress runs, pushes, pings) normalizes to an
//! empty list.

use bus::NormalizedEvent;
use serde_json::{json, Map, Value};

use super::WebhookSecret;
use crate::signature::{content_hash, parse_signature_header, verify_signature, Digest};
use crate::WebhookHeaders;

/// Header carrying `sha256=<hex>`.
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";
/// Header naming the event type.
pub const HEADER_EVENT: &str = "x-github-event";
/// Header carrying the unique delivery id.
pub const HEADER_DELIVERY: &str = "x-github-delivery";
/// Environment variable the secret is read from.
pub const SECRET_ENV: &str = "GITHUB_WEBHOOK_SECRET";

/// Event emitted for a finished workflow run.
pub const WORKFLOW_RUN_COMPLETED: &str = "github/workflow_run.completed";
/// Event emitted for a published package version.
pub const PACKAGE_PUBLISHED: &str = "github/package.published";

/// Source-control provider: HMAC-SHA256 over the raw body.
#[derive(Debug)]
pub struct GitHubProvider {
    secret: WebhookSecret,
}

impl GitHubProvider {
    pub const ID: &'static str = "github";

    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: WebhookSecret::new(secret, SECRET_ENV),
        }
    }

    pub fn verify_signature(&self, raw_body: &[u8], headers: &WebhookHeaders) -> bool {
        let Some(secret) = self.secret.get(Self::ID) else {
            return false;
        };
        let Some(provided) = headers
            .get(HEADER_SIGNATURE)
            .and_then(|h| parse_signature_header(h, Some("sha256")))
        else {
            return false;
        };
        verify_signature(Digest::Sha256, raw_body, &provided, secret)
    }

    pub fn normalize_payload(&self, body: &[u8], headers: &WebhookHeaders) -> Vec<NormalizedEvent> {
        let Ok(payload) = serde_json::from_slice::<Value>(body) else {
            return Vec::new();
        };
        let delivery = headers
            .get(HEADER_DELIVERY)
            .map(str::to_string)
            .unwrap_or_else(|| format!("sha256-{}", content_hash(body)));
        let action = payload.get("action").and_then(Value::as_str);

        let event = match (headers.get(HEADER_EVENT), action) {
            (Some("workflow_run"), Some("completed")) => {
                workflow_run_completed(&payload, &delivery)
            }
            (Some("package" | "registry_package"), Some("published")) => {
                package_published(&payload, &delivery)
            }
            _ => None,
        };
        event.into_iter().collect()
    }
}

fn repository(payload: &Value) -> Value {
    payload
        .pointer("/repository/full_name")
        .cloned()
        .unwrap_or(Value::Null)
}

fn workflow_run_completed(payload: &Value, delivery: &str) -> Option<NormalizedEvent> {
    let run = payload.get("workflow_run")?;
    let run_id = run.get("id").and_then(Value::as_u64)?;

    let data = json!({
        "repository": repository(payload),
        "runId": run_id,
        "workflowName": run.get("name"),
        "conclusion": run.get("conclusion"),
        "headBranch": run.get("head_branch"),
        "headSha": run.get("head_sha"),
        "runAttempt": run.get("run_attempt"),
        "htmlUrl": run.get("html_url"),
    });

    Some(NormalizedEvent::new(
        WORKFLOW_RUN_COMPLETED,
        into_object(data),
        format!("github:{delivery}:workflow_run:{run_id}"),
    ))
}

fn package_published(payload: &Value, delivery: &str) -> Option<NormalizedEvent> {
    let package = payload
        .get("package")
        .or_else(|| payload.get("registry_package"))?;
    let package_id = package.get("id").and_then(Value::as_u64)?;
    let version = package.get("package_version");

    let data = json!({
        "repository": repository(payload),
        "packageId": package_id,
        "packageName": package.get("name"),
        "packageType": package.get("package_type").or_else(|| package.get("ecosystem")),
        "version": version.and_then(|v| v.get("version").or_else(|| v.get("name"))),
        "htmlUrl": version.and_then(|v| v.get("html_url")),
    });

    Some(NormalizedEvent::new(
        PACKAGE_PUBLISHED,
        into_object(data),
        format!("github:{delivery}:package:{package_id}"),
    ))
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
