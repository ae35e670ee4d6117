//! Shared value types for the system bus.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! the payloads that flow between webhook ingestion, the message store, and the
//! agent loop.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{LoopId, MessageId, StoryId, StreamId};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Provider-agnostic event produced by webhook normalization and by the agent
/// loop's stage signalling.
///
/// The `idempotency_key` is derived from stable identifying inputs (delivery
/// id, resource id, content hash) so that redelivery of the same occurrence
/// never fires downstream effects twice. It is serialised as `id`, which is
/// the field name the event-intake API deduplicates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Event name, e.g. `"github/workflow_run.completed"`.
    pub name: String,

    /// Event body. Always a JSON object.
    pub data: Map<String, Value>,

    /// Deterministic deduplication key.
    #[serde(rename = "id")]
    pub idempotency_key: String,
}

impl NormalizedEvent {
    /// Creates an event from its three parts.
    pub fn new(
        name: impl Into<String>,
        data: Map<String, Value>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data,
            idempotency_key: idempotency_key.into(),
        }
    }

    /// Returns a string field of `data`, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Priorities
// ---------------------------------------------------------------------------

/// Message priority. Lower ordinal is more urgent, so the derived `Ord` sorts
/// the most urgent priority first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Explicit directive or command (slash-prefixed prompt).
    P0,
    /// Interactive, human-originated message.
    P1,
    /// Heartbeat or scheduled signal.
    P2,
    /// Routine background work.
    #[default]
    P3,
}

impl Priority {
    /// Every priority, most urgent first.
    pub const ALL: [Priority; 4] = [Priority::P0, Priority::P1, Priority::P2, Priority::P3];

    /// Returns the next more urgent priority. `P0` is already the top.
    pub fn promoted(self) -> Self {
        match self {
            Priority::P0 | Priority::P1 => Priority::P0,
            Priority::P2 => Priority::P1,
            Priority::P3 => Priority::P2,
        }
    }

    /// Lower-case label used for stream keys and log fields (`"p0"` … `"p3"`).
    pub fn as_label(self) -> &'static str {
        match self {
            Priority::P0 => "p0",
            Priority::P1 => "p1",
            Priority::P2 => "p2",
            Priority::P3 => "p3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Input to the message store's `persist` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Source tag, e.g. `"telegram"`, `"heartbeat"`, `"github"`.
    pub source: String,

    /// Free-text body of the message.
    pub prompt: String,

    /// Arbitrary structured context carried with the message.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// When present, a second persist with the same key is not enqueued again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl NewMessage {
    /// Creates a message with empty metadata and no idempotency key.
    pub fn new(source: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            prompt: prompt.into(),
            metadata: Map::new(),
            idempotency_key: None,
        }
    }

    /// Builds the message that represents a normalized webhook event.
    ///
    /// The event name becomes the prompt, the event body is nested under
    /// `metadata.data`, and the event's idempotency key carries over (and is
    /// kept as `metadata.eventId`) so that redelivered webhooks are not queued
    /// twice and the drained event keeps its original id.
    pub fn from_event(source: impl Into<String>, event: &NormalizedEvent) -> Self {
        let mut metadata = Map::new();
        metadata.insert("event".to_string(), Value::String(event.name.clone()));
        metadata.insert("data".to_string(), Value::Object(event.data.clone()));
        metadata.insert("eventId".to_string(), Value::String(event.idempotency_key.clone()));
        Self {
            source: source.into(),
            prompt: event.name.clone(),
            metadata,
            idempotency_key: Some(event.idempotency_key.clone()),
        }
    }
}

/// A message as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub source: String,
    pub prompt: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Arrival time in epoch milliseconds.
    pub timestamp: i64,
    pub priority: Priority,
    pub acked: bool,
}

/// A stored message selected by a drain, with its scheduling annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMessage {
    #[serde(flatten)]
    pub message: StoredMessage,

    /// Milliseconds between arrival and the drain that selected this message.
    pub wait_time_ms: i64,

    /// Priority used for ordering. Differs from `message.priority` only when
    /// the message was promoted for waiting too long.
    pub effective_priority: Priority,

    /// Original priority when the message was promoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_from: Option<Priority>,
}

/// Result of persisting a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReceipt {
    pub stream_id: StreamId,
    pub priority: Priority,
    /// `true` when the idempotency key had already been persisted and nothing
    /// new was enqueued.
    pub duplicate: bool,
}

// ---------------------------------------------------------------------------
// Agent loop failures
// ---------------------------------------------------------------------------

/// Body of the `agent/loop.function.failed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopFunctionFailure {
    pub loop_id: LoopId,
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<StoryId>,
    pub error: String,
    /// ISO-8601 time the failure was handled.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from epoch milliseconds. Out-of-range values
    /// clamp to the Unix epoch.
    pub fn from_epoch_ms(ms: i64) -> Self {
        Self(DateTime::from_timestamp_millis(ms).unwrap_or_default())
    }

    /// Returns the timestamp as epoch milliseconds.
    pub fn as_epoch_ms(self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Renders the timestamp as ISO-8601 with millisecond precision.
    pub fn to_iso8601(self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso8601())
    }
}
