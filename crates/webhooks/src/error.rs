//! Error types for webhook ingestion.

use thiserror::Error;

/// Errors that can occur while handling a webhook delivery.
///
/// Malformed or irrelevant payloads are deliberately absent: they normalize to
/// an empty event list rather than failing the delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// No provider is registered under the requested id.
    #[error("unknown webhook provider: {0}")]
    UnknownProvider(String),

    /// The signature header is missing, malformed, or does not match, or the
    /// provider has no secret configured. Nothing downstream has run.
    #[error("invalid signature for provider {provider}")]
    InvalidSignature {
        /// Provider that rejected the delivery.
        provider: &'static str,
    },
}
