//! Error types for the agent loop.

use bus::SinkError;
use thiserror::Error;

/// Errors a stage function hands back to whatever dispatched it.
///
/// Stage failures themselves are not here: they are converted into
/// `agent/loop.function.failed` events by the failure handler.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The trigger event carried no `loopId`, so nothing can be attributed
    /// to a loop.
    #[error("trigger event {event} has no loopId")]
    MissingLoopId {
        /// Name of the offending trigger event.
        event: String,
    },

    /// Emitting the next event (or the failure event) failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
}
