//! Webhook provider adapters and the registry that dispatches to them.
//!
//! Each provider is one variant of [`Provider`] and owns everything specific
//! to it: the signature header, the digest algorithm, the secret, and the
//! payload mapping. The registry is a plain map from [`ProviderId`] to
//! variant; there is no shared base behaviour to inherit.
//!
//! | Provider | Header | Digest | Route |
//! |----------|--------|--------|-------|
//! | [`GitHubProvider`] | `x-hub-signature-256` | HMAC-SHA256 | persist |
//! | [`VercelProvider`] | `x-vercel-signature` | HMAC-SHA1 (legacy) | persist |
//! | [`PeerProvider`] | `x-peer-signature` | HMAC-SHA256 | relay |

mod github;
mod peer;
mod vercel;

pub use github::GitHubProvider;
pub use peer::PeerProvider;
pub use vercel::VercelProvider;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bus::{NormalizedEvent, ProviderId};
use tracing::{debug, warn};

use crate::{WebhookError, WebhookHeaders};

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// A provider's shared secret, with a latch so a missing secret is reported
/// once per provider rather than once per request.
#[derive(Debug)]
pub struct WebhookSecret {
    value: Option<Vec<u8>>,
    env_var: &'static str,
    warned: AtomicBool,
}

impl WebhookSecret {
    /// Wraps an optional secret. Empty strings count as absent.
    pub fn new(value: Option<String>, env_var: &'static str) -> Self {
        Self {
            value: value.filter(|v| !v.is_empty()).map(String::into_bytes),
            env_var,
            warned: AtomicBool::new(false),
        }
    }

    /// Returns the secret, or `None` (warning the first time) when it is not
    /// configured.
    pub(crate) fn get(&self, provider: &'static str) -> Option<&[u8]> {
        if self.value.is_none() && !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                provider,
                env_var = self.env_var,
                "Webhook secret not configured; rejecting all deliveries"
            );
        }
        self.value.as_deref()
    }

    /// `true` once the missing-secret warning has been emitted.
    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Where the ingress sends a provider's normalized events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Persist into the message store for prioritized draining.
    Persist,
    /// Forward straight to the event intake.
    Relay,
}

/// A configured webhook provider.
#[derive(Debug)]
pub enum Provider {
    GitHub(GitHubProvider),
    Vercel(VercelProvider),
    Peer(PeerProvider),
}

impl Provider {
    /// Registry key and log label.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::GitHub(_) => GitHubProvider::ID,
            Provider::Vercel(_) => VercelProvider::ID,
            Provider::Peer(_) => PeerProvider::ID,
        }
    }

    /// Where this provider's events go after normalization.
    pub fn route(&self) -> Route {
        match self {
            Provider::GitHub(_) | Provider::Vercel(_) => Route::Persist,
            Provider::Peer(_) => Route::Relay,
        }
    }

    /// Checks the delivery's signature. Fails closed.
    pub fn verify_signature(&self, raw_body: &[u8], headers: &WebhookHeaders) -> bool {
        match self {
            Provider::GitHub(p) => p.verify_signature(raw_body, headers),
            Provider::Vercel(p) => p.verify_signature(raw_body, headers),
            Provider::Peer(p) => p.verify_signature(raw_body, headers),
        }
    }

    /// Maps a delivery to zero or more normalized events. Pure.
    pub fn normalize_payload(&self, body: &[u8], headers: &WebhookHeaders) -> Vec<NormalizedEvent> {
        match self {
            Provider::GitHub(p) => p.normalize_payload(body, headers),
            Provider::Vercel(p) => p.normalize_payload(body, headers),
            Provider::Peer(p) => p.normalize_payload(body, headers),
        }
    }

    /// Verifies, then normalizes. Normalization never runs for a delivery
    /// that fails verification.
    pub fn handle(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<Vec<NormalizedEvent>, WebhookError> {
        if !self.verify_signature(raw_body, headers) {
            warn!(provider = self.id(), "Invalid webhook signature");
            return Err(WebhookError::InvalidSignature {
                provider: self.id(),
            });
        }

        let events = self.normalize_payload(raw_body, headers);
        if events.is_empty() {
            debug!(provider = self.id(), "Delivery normalized to no events");
        }
        Ok(events)
    }
}

/// Providers keyed by id.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Provider>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its own id, replacing any previous one.
    pub fn register(&mut self, provider: Provider) {
        if let Some(id) = ProviderId::new(provider.id()) {
            self.providers.insert(id, provider);
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, provider: Provider) -> Self {
        self.register(provider);
        self
    }

    /// Looks a provider up by id.
    pub fn get(&self, id: &str) -> Result<&Provider, WebhookError> {
        ProviderId::new(id)
            .and_then(|id| self.providers.get(&id))
            .ok_or_else(|| WebhookError::UnknownProvider(id.to_string()))
    }

    /// Registered provider ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.providers.keys().map(ProviderId::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
