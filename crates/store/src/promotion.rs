//! Anti-starvation promotion.
//!
//! A message that has waited at least its priority's threshold is drained as
//! if it were one level more urgent. Promotion is computed per drain and is
//! never written back: the stored priority does not change.

use bus::Priority;
use serde::{Deserialize, Serialize};

/// Wait time, in milliseconds, after which each priority is promoted one
/// level. `P0` has nowhere to go and has no threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionThresholds {
    pub p1_ms: i64,
    pub p2_ms: i64,
    pub p3_ms: i64,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self {
            p1_ms: 2 * 60 * 1000,
            p2_ms: 10 * 60 * 1000,
            p3_ms: 30 * 60 * 1000,
        }
    }
}

impl PromotionThresholds {
    /// Threshold for `priority`, or `None` for `P0`.
    pub fn threshold(&self, priority: Priority) -> Option<i64> {
        match priority {
            Priority::P0 => None,
            Priority::P1 => Some(self.p1_ms),
            Priority::P2 => Some(self.p2_ms),
            Priority::P3 => Some(self.p3_ms),
        }
    }

    /// Returns `(effective_priority, promoted_from)` for a message of
    /// `priority` that has waited `wait_time_ms`.
    pub fn apply(&self, priority: Priority, wait_time_ms: i64) -> (Priority, Option<Priority>) {
        match self.threshold(priority) {
            Some(threshold) if wait_time_ms >= threshold => (priority.promoted(), Some(priority)),
            _ => (priority, None),
        }
    }
}
