//! Case files and the console runner
//!
//! Reads YAML test cases, converts them into engine test cases and runs
//! them against an in-memory host built from a scene fixture.

mod config;
mod runner;

pub use config::*;
pub use runner::{run_batch_files, run_case_file, validate_files, ConsolePrinter, RunSummary};
