//! Vercel deploy webhook adapter.
//!
//! Vercel signs with HMAC-SHA1 and sends the bare hex digest. This is the one
//! provider that does not use SHA-256; it is kept for compatibility and should
//! not be copied for new providers.

use bus::NormalizedEvent;
use serde_json::{json, Map, Value};

use super::WebhookSecret;
use crate::signature::{content_hash, parse_signature_header, verify_signature, Digest};
use crate::WebhookHeaders;

/// Header carrying the bare hex HMAC-SHA1 digest.
pub const HEADER_SIGNATURE: &str = "x-vercel-signature";
/// Environment variable the secret is read from.
pub const SECRET_ENV: &str = "VERCEL_WEBHOOK_SECRET";

/// Deploy-platform provider.
#[derive(Debug)]
pub struct VercelProvider {
    secret: WebhookSecret,
}

impl VercelProvider {
    pub const ID: &'static str = "vercel";

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
            .and_then(|h| parse_signature_header(h, None))
        else {
            return false;
        };
        verify_signature(Digest::Sha1, raw_body, &provided, secret)
    }

    pub fn normalize_payload(
        &self,
        body: &[u8],
        _headers: &WebhookHeaders,
    ) -> Vec<NormalizedEvent> {
        let Ok(payload) = serde_json::from_slice::<Value>(body) else {
            return Vec::new();
        };
        let Some(kind) = payload.get("type").and_then(Value::as_str) else {
            return Vec::new();
        };
        let name = match kind {
            "deployment.created" => "vercel/deploy.created",
            "deployment.succeeded" => "vercel/deploy.succeeded",
            "deployment.error" => "vercel/deploy.error",
            "deployment.canceled" => "vercel/deploy.canceled",
            _ => return Vec::new(),
        };

        let inner = payload.get("payload").unwrap_or(&Value::Null);
        let deployment = inner.get("deployment").unwrap_or(&Value::Null);
        let meta = deployment.get("meta").unwrap_or(&Value::Null);

        let data = json!({
            "eventType": kind,
            "deploymentId": deployment.get("id"),
            "url": deployment.get("url").or_else(|| inner.get("url")),
            "projectName": deployment.get("name").or_else(|| inner.get("name")),
            "target": inner.get("target"),
            "githubCommitSha": meta.get("githubCommitSha"),
            "githubCommitMessage": meta.get("githubCommitMessage"),
        });
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let key = match payload.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => format!("vercel:{id}"),
            _ => format!("vercel:sha256-{}", content_hash(body)),
        };

        vec![NormalizedEvent::new(name, data, key)]
    }
}
