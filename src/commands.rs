//! CLI command definitions
//!
//! Defines the clap commands for the uitest CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one test case file
    Run {
        /// Path to the YAML test case
        case: PathBuf,

        /// Scene fixture to run against (overrides the case's own fixture)
        #[arg(long)]
        scene: Option<PathBuf>,

        /// Ambient wait timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Frames between two condition checks
        #[arg(long)]
        poll_frames: Option<u32>,

        /// Print a JSON report on stdout instead of progress lines
        #[arg(long)]
        json: bool,
    },

    /// Run several test case files in order against one host
    Batch {
        /// Paths to the YAML test cases, run in the given order
        #[arg(required = true)]
        cases: Vec<PathBuf>,

        /// Scene fixture shared by every case
        #[arg(long)]
        scene: Option<PathBuf>,

        /// Seconds to wait between two cases
        #[arg(long)]
        gap: Option<f64>,

        /// Ambient wait timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Print a JSON report on stdout instead of progress lines
        #[arg(long)]
        json: bool,
    },

    /// Check that test case files parse without running them
    Validate {
        /// Paths to the YAML test cases
        #[arg(required = true)]
        cases: Vec<PathBuf>,
    },
}
