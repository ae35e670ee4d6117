//! Trusted-peer relay adapter.
//!
//! The peer posts events already in bus shape, `{name, data, id?}`, either as
//! a single object or as an array. Once the signature checks out the envelope
//! is passed through as-is; this provider has no payload mapping of its own.

use bus::NormalizedEvent;
use serde_json::{Map, Value};

use super::WebhookSecret;
use crate::signature::{content_hash, parse_signature_header, verify_signature, Digest};
use crate::WebhookHeaders;

/// Header carrying `sha256=<hex>` (bare hex is also accepted).
pub const HEADER_SIGNATURE: &str = "x-peer-signature";
/// Environment variable the secret is read from.
pub const SECRET_ENV: &str = "PEER_WEBHOOK_SECRET";

#[derive(Debug)]
pub struct PeerProvider {
    secret: WebhookSecret,
}

impl PeerProvider {
    pub const ID: &'static str = "peer";

    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: WebhookSecret::new(secret, SECRET_ENV),
        }
    }

    pub fn verify_signature(&self, raw_body: &[u8], headers: &WebhookHeaders) -> bool {
        let Some(secret) = self.secret.get(Self::ID) else {
            return false;
        };
        let Some(provided) = headers.get(HEADER_SIGNATURE).and_then(|h| {
            parse_signature_header(h, Some("sha256")).or_else(|| parse_signature_header(h, None))
        }) else {
            return false;
        };
        verify_signature(Digest::Sha256, raw_body, &provided, secret)
    }

    pub fn normalize_payload(
        &self,
        body: &[u8],
        _headers: &WebhookHeaders,
    ) -> Vec<NormalizedEvent> {
        let envelopes = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(items)) => items,
            Ok(item) => vec![item],
            Err(_) => return Vec::new(),
        };
        envelopes.iter().filter_map(envelope_to_event).collect()
    }
}

fn envelope_to_event(envelope: &Value) -> Option<NormalizedEvent> {
    let name = envelope.get("name").and_then(Value::as_str).filter(|n| !n.is_empty())?;
    let data = match envelope.get("data") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return None,
    };
    let key = match envelope.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        // serde_json maps are sorted, so re-serialising is canonical.
        _ => format!(
            "peer:{}",
            content_hash(&serde_json::to_vec(envelope).unwrap_or_default())
        ),
    };
    Some(NormalizedEvent::new(name, data, key))
}
