//! Error types for the message store.

use thiserror::Error;

/// Failure of the underlying durable log.
///
/// The store never masks these: every operation that touches the log returns
/// them to the caller unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The log backend reported an error.
    #[error("message log failure: {message}")]
    Backend {
        /// Backend-supplied description.
        message: String,
    },

    /// The log's internal state is unusable after a panic in another caller.
    #[error("message log state poisoned")]
    Poisoned,
}
