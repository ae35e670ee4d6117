//! The agent loop pipeline.
//!
//! Seven stage functions (`plan`, `test-writer`, `implement`, `review`,
//! `judge`, `complete`, `retro`) chained by events. Every function is built by
//! [`LoopFunction::new`], which attaches the same failure handler from
//! [`create_loop_on_failure`]: a stage error is logged once, reported as one
//! `agent/loop.function.failed` event, and never retried inline.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** Functions sequence calls between the stage state machine
//! in [`bus`] and the [`StageRunner`] and [`bus::EventSink`] ports. The
//! substrate that schedules them is external; [`LocalDispatcher`] stands in
//! for it in-process.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`failure`] | `create_loop_on_failure`, `LoopOnFailure` |
//! | [`function`] | `LoopFunction`, `Invocation` |
//! | [`runner`] | `StageRunner` port, `CommandStageRunner` |
//! | [`dispatcher`] | `LocalDispatcher`, `LocalQueue` |
//! | [`trigger`] | `LoopContext` (`loopId` / `storyId` on the wire) |
//! | [`error`] | `LoopError` |

pub mod dispatcher;
pub mod error;
pub mod failure;
pub mod function;
pub mod runner;
pub mod trigger;

pub use dispatcher::{LocalDispatcher, LocalQueue};
pub use error::LoopError;
pub use failure::{create_loop_on_failure, LoopOnFailure};
pub use function::{failed_stage, Invocation, LoopFunction};
pub use runner::{CommandStageRunner, StageRunner, DEFAULT_STAGE_TIMEOUT};
pub use trigger::{LoopContext, LOOP_ID_KEY, STORY_ID_KEY};
