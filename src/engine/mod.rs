//! Test execution engine
//!
//! Conditions are polled on a frame cadence by the [`Waiter`]; steps run
//! under a timeout through the executor; cases and batches sequence steps;
//! the [`Runner`] ties a case to a host environment and publishes run state.

pub mod action;
pub mod batch;
pub mod case;
pub mod condition;
pub mod executor;
pub mod frames;
pub mod runner;
pub mod step;
pub mod waiter;

pub use action::ActionSpec;
pub use batch::{run_batch, BatchReport};
pub use case::{CaseEnd, CaseObserver, CaseReport, TestCase};
pub use condition::{Condition, ConditionSpec, MatchMode};
pub use executor::{run_step_with_timeout, StepOutcome, StepRun};
pub use frames::{CancelToken, Frames};
pub use runner::{EnvEvent, Environment, RunPhase, RunState, Runner};
pub use step::{Step, StepBody, StepContext, StepKind};
pub use waiter::{WaitStats, Waiter};
