//! Newtype domain identifiers.
//!
//! Every identity that crosses a crate boundary is a distinct newtype so that a
//! [`LoopId`] can never be passed where a [`StoryId`] or [`MessageId`] is
//! expected, even though all of them are strings on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Identifies one end-to-end run of the agent loop pipeline.
    LoopId
}

string_id! {
    /// Identifies the tracked work item a loop is implementing, when there is one.
    StoryId
}

string_id! {
    /// Identifies a message held by the message store.
    MessageId
}

string_id! {
    /// Position of a message within its priority stream (`<epoch-ms>-<seq>`).
    StreamId
}

string_id! {
    /// Identifies a webhook provider in the provider registry (e.g. `"github"`).
    ProviderId
}

impl MessageId {
    /// Generates a fresh random message identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
