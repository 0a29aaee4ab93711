//! uitest - declarative, asynchronous UI test orchestration
//!
//! Test cases are ordered steps (actions, condition waits, delays, logs,
//! groups, custom bodies). Conditions are polled on a frame cadence, every
//! step runs under a timeout and a runner publishes observable run state.
//! The UI itself is reached only through the capability traits in [`host`].

pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod host;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, ErrorKind, Result};
pub use engine::{Runner, Step, TestCase};
