//! Agent loop stages and the state machine that sequences them.
//!
//! ```text
//! plan → test-writer → implement → review → judge → complete ─┐
//!   │         │            │          │        │              ├→ retro
//!   └─────────┴────────────┴──────────┴────────┴──→ failed ───┘
//! ```
//!
//! Each stage advances to the next on success. An unrecovered error in any
//! stage moves the loop to `failed`, which halts the main chain. Both
//! `complete` and `failed` lead to `retro`, so every loop is retrospected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TransitionError;

/// Event emitted once per unrecovered stage failure.
pub const LOOP_FUNCTION_FAILED: &str = "agent/loop.function.failed";

/// Event that starts a new loop.
pub const LOOP_STARTED: &str = "agent/loop.started";

/// Event emitted when the `complete` stage finishes.
pub const LOOP_COMPLETED: &str = "agent/loop.completed";

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One of the seven stage functions of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopStage {
    Plan,
    TestWriter,
    Implement,
    Review,
    Judge,
    Complete,
    Retro,
}

impl LoopStage {
    /// Every stage function, in pipeline order.
    pub const ALL: [LoopStage; 7] = [
        LoopStage::Plan,
        LoopStage::TestWriter,
        LoopStage::Implement,
        LoopStage::Review,
        LoopStage::Judge,
        LoopStage::Complete,
        LoopStage::Retro,
    ];

    /// Function name used in logs and in failure events.
    pub fn name(self) -> &'static str {
        match self {
            LoopStage::Plan => "plan",
            LoopStage::TestWriter => "test-writer",
            LoopStage::Implement => "implement",
            LoopStage::Review => "review",
            LoopStage::Judge => "judge",
            LoopStage::Complete => "complete",
            LoopStage::Retro => "retro",
        }
    }

    /// Event that triggers this stage directly (`agent/loop.<name>`).
    pub fn trigger_event(self) -> String {
        format!("agent/loop.{}", self.name())
    }

    /// Every event name this stage runs on.
    pub fn triggers(self) -> Vec<String> {
        match self {
            LoopStage::Plan => vec![LOOP_STARTED.to_string(), self.trigger_event()],
            LoopStage::Retro => vec![LOOP_COMPLETED.to_string(), LOOP_FUNCTION_FAILED.to_string()],
            _ => vec![self.trigger_event()],
        }
    }

    /// Event emitted when this stage succeeds, or `None` for the terminal
    /// `retro` stage.
    pub fn success_event(self) -> Option<String> {
        match self {
            LoopStage::Complete => Some(LOOP_COMPLETED.to_string()),
            LoopStage::Retro => None,
            _ => self.next().map(LoopStage::trigger_event),
        }
    }

    /// Next stage in the main chain. `complete` and `retro` have none.
    pub fn next(self) -> Option<LoopStage> {
        match self {
            LoopStage::Plan => Some(LoopStage::TestWriter),
            LoopStage::TestWriter => Some(LoopStage::Implement),
            LoopStage::Implement => Some(LoopStage::Review),
            LoopStage::Review => Some(LoopStage::Judge),
            LoopStage::Judge => Some(LoopStage::Complete),
            LoopStage::Complete | LoopStage::Retro => None,
        }
    }

    /// Parses a function name back into a stage.
    pub fn from_name(name: &str) -> Option<LoopStage> {
        LoopStage::ALL.into_iter().find(|stage| stage.name() == name)
    }
}

impl fmt::Display for LoopStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Where a loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopState {
    /// Running (or about to run) the given main-chain stage.
    Running(LoopStage),
    /// Main chain finished; retro pending.
    Complete,
    /// A stage failed without recovery; retro pending.
    Failed,
    /// Retrospective done. Terminal.
    Retro,
}

/// Result of running the stage a loop is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed,
}

impl LoopState {
    /// State of a freshly started loop.
    pub fn start() -> Self {
        LoopState::Running(LoopStage::Plan)
    }

    /// Applies the outcome of the current stage.
    ///
    /// `Complete` and `Failed` accept only a retro outcome (either way the
    /// retro has run); `Retro` is terminal and accepts nothing.
    pub fn advance(self, outcome: StageOutcome) -> Result<LoopState, TransitionError> {
        match (self, outcome) {
            (LoopState::Running(LoopStage::Complete), StageOutcome::Succeeded) => {
                Ok(LoopState::Complete)
            }
            (LoopState::Running(LoopStage::Retro), _) => Err(TransitionError {
                from: self,
                reason: "retro is not part of the main chain",
            }),
            (LoopState::Running(stage), StageOutcome::Succeeded) => match stage.next() {
                Some(next) => Ok(LoopState::Running(next)),
                None => Ok(LoopState::Complete),
            },
            (LoopState::Running(_), StageOutcome::Failed) => Ok(LoopState::Failed),
            (LoopState::Complete | LoopState::Failed, _) => Ok(LoopState::Retro),
            (LoopState::Retro, _) => Err(TransitionError {
                from: self,
                reason: "retro is terminal",
            }),
        }
    }

    /// `true` once the main chain can no longer make progress.
    pub fn is_halted(self) -> bool {
        matches!(self, LoopState::Complete | LoopState::Failed | LoopState::Retro)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Running(stage) => write!(f, "{stage}"),
            LoopState::Complete => f.write_str("complete"),
            LoopState::Failed => f.write_str("failed"),
            LoopState::Retro => f.write_str("retro"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_walks_the_main_chain_to_retro() {
        let mut state = LoopState::start();
        let mut seen = vec![state.to_string()];
        while state != LoopState::Retro {
            state = state.advance(StageOutcome::Succeeded).unwrap();
            seen.push(state.to_string());
        }
        assert_eq!(
            seen,
            [
                "plan",
                "test-writer",
                "implement",
                "review",
                "judge",
                "complete",
                "complete",
                "retro"
            ]
        );
    }

    #[test]
    fn failure_halts_and_still_reaches_retro() {
        let state = LoopState::Running(LoopStage::Implement)
            .advance(StageOutcome::Failed)
            .unwrap();
        assert_eq!(state, LoopState::Failed);
        assert!(state.is_halted());
        assert_eq!(state.advance(StageOutcome::Succeeded).unwrap(), LoopState::Retro);
    }

    #[test]
    fn retro_is_terminal() {
        assert!(LoopState::Retro.advance(StageOutcome::Succeeded).is_err());
        assert!(LoopState::Running(LoopStage::Retro)
            .advance(StageOutcome::Succeeded)
            .is_err());
    }

    #[test]
    fn stage_events_chain_together() {
        assert_eq!(
            LoopStage::Plan.success_event().as_deref(),
            Some("agent/loop.test-writer")
        );
        assert_eq!(
            LoopStage::Complete.success_event().as_deref(),
            Some(LOOP_COMPLETED)
        );
        assert_eq!(LoopStage::Retro.success_event(), None);
        assert!(LoopStage::Retro
            .triggers()
            .contains(&LOOP_FUNCTION_FAILED.to_string()));
    }

    #[test]
    fn names_round_trip_through_from_name() {
        for stage in LoopStage::ALL {
            assert_eq!(LoopStage::from_name(stage.name()), Some(stage));
        }
        assert_eq!(LoopStage::from_name("deploy"), None);
    }
}
