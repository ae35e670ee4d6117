//! Core domain for the system bus.
//!
//! This crate contains the event, message, and loop-state types shared by every
//! other crate in the workspace, along with the pure rules that operate on them.
//! Infrastructure crates implement the traits defined here; they never add
//! domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`LoopId`, `MessageId`, etc.) |
//! | [`types`] | Events, messages, priorities, failure records, timestamps |
//! | [`priority`] | `classify_priority` |
//! | [`loop_state`] | Agent loop stages and transitions |
//! | [`ports`] | `EventSink` and `Clock` traits with in-process implementations |
//! | [`errors`] | Errors that appear in port signatures |

pub mod errors;
pub mod identifiers;
pub mod loop_state;
pub mod ports;
pub mod priority;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{SinkError, StageError, TransitionError};
pub use identifiers::{LoopId, MessageId, ProviderId, StoryId, StreamId};
pub use loop_state::{
    LoopStage, LoopState, StageOutcome, LOOP_COMPLETED, LOOP_FUNCTION_FAILED, LOOP_STARTED,
};
pub use ports::{Clock, EventSink, ManualClock, RecordingSink, SystemClock};
pub use priority::{classify, classify_priority};
pub use types::{
    CandidateMessage, LoopFunctionFailure, NewMessage, NormalizedEvent, PersistReceipt, Priority,
    StoredMessage, Timestamp,
};
