//! uitest - declarative UI test runner
//!
//! Runs YAML test cases against a scene fixture and reports each step.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use uitest::cli::{self, Outcome};
use uitest::common::config::Config;
use uitest::common::logging;
use uitest::commands;

#[derive(Parser)]
#[command(name = "uitest", about = "Declarative async UI test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write the full trace to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Show debug logs on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let guard = match &cli.log_file {
        Some(path) => match logging::init_with_file(path, cli.verbose) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: cannot open log file '{}': {e}", path.display());
                std::process::exit(1);
            }
        },
        None => {
            logging::init_cli(cli.verbose);
            None
        }
    };

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, config.engine()).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(Outcome::Passed) => 0,
        Ok(Outcome::Failed) => 1,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the log file before exiting
    drop(guard);
    std::process::exit(code);
}
