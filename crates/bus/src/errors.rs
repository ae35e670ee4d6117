//! Cross-crate error types.
//!
//! Component-level errors (webhook verification, storage, probing) live in
//! their own crates. The types here are the ones that appear in port traits
//! defined by this crate.

use thiserror::Error;

use crate::LoopState;

/// Failure to hand an event to its destination.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The destination could not be reached or rejected the request.
    #[error("event delivery failed: {message}")]
    Delivery {
        /// Transport or status description.
        message: String,
    },

    /// The destination has shut down and accepts no more events.
    #[error("event sink closed")]
    Closed,
}

/// Failure of a single agent-loop stage.
///
/// The message text is what ends up in the `error` field of the
/// `agent/loop.function.failed` event, so it should be readable on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct StageError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl StageError {
    /// Creates a stage error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An attempt to move a loop through a transition its state does not allow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid loop transition from {from}: {reason}")]
pub struct TransitionError {
    /// State the loop was in.
    pub from: LoopState,
    /// Why the transition is not allowed.
    pub reason: &'static str,
}
