//! System bus webhook ingestion.
//!
//! Turns signed provider deliveries into [`bus::NormalizedEvent`]s:
//!
//! 1. The ingress looks the provider up in a [`ProviderRegistry`].
//! 2. [`Provider::verify_signature`] checks the HMAC over the raw body. A
//!    missing secret fails closed.
//! 3. [`Provider::normalize_payload`] maps the body to zero or more events.
//!    Irrelevant deliveries map to an empty list, which is not an error.
//!
//! [`Provider::handle`] runs steps 2 and 3 in that order and never normalizes
//! an unauthenticated body.
//!
//! [`EventIntakeClient`] relays events to the local event-intake API and is
//! the production [`bus::EventSink`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Header names, digest algorithms, and provider payload
//! shapes all live here. The [`bus`] crate sees only normalized events.

pub mod error;
pub mod headers;
pub mod providers;
pub mod relay;
pub mod signature;

pub use error::WebhookError;
pub use headers::WebhookHeaders;
pub use providers::{
    GitHubProvider, PeerProvider, Provider, ProviderRegistry, Route, VercelProvider, WebhookSecret,
};
pub use relay::EventIntakeClient;
