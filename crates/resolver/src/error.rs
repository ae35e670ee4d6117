//! Error types for endpoint probing.

use thiserror::Error;

/// Why a single probe did not succeed.
///
/// The `Display` text is what ends up as a skipped candidate's reason, so each
/// variant reads on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The TCP connection could not be established.
    #[error("{message}")]
    Connect {
        /// Innermost transport error, e.g. `connection refused`.
        message: String,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("HTTP {0}")]
    Status(u16),

    /// No answer within the per-probe timeout.
    #[error("timed out after {after_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        after_ms: u128,
    },

    /// Any other client failure (invalid URL, TLS, protocol).
    #[error("{message}")]
    Other {
        /// Client-supplied description.
        message: String,
    },
}
