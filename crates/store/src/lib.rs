//! Priority message store for the system bus.
//!
//! Inbound messages are classified into four priority tiers and appended to
//! one stream per tier. Draining reads across all tiers, applies
//! anti-starvation promotion, and claims each returned message atomically so
//! concurrent drains never hand out the same message twice.
//!
//! ## Architectural Layer
//!
//! **Application logic over a storage port.** The durable log is the
//! [`MessageLog`] trait; [`InMemoryLog`] is the in-process implementation.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`store`] | `MessageStore` and `index_messages_by_priority` |
//! | [`promotion`] | `PromotionThresholds` |
//! | [`log`] | `MessageLog` port and `InMemoryLog` |
//! | [`error`] | `StoreError` |

pub mod error;
pub mod log;
pub mod promotion;
pub mod store;

pub use error::StoreError;
pub use log::{AppendOutcome, InMemoryLog, LogRecord, MessageLog};
pub use promotion::PromotionThresholds;
pub use store::{
    index_messages_by_priority, DrainOptions, MessageStore, StoreConfig, DEFAULT_CLAIM_TTL_MS,
    DEFAULT_STREAM_PREFIX,
};
