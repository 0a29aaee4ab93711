//! CLI command handling
//!
//! Applies command-line overrides to the engine settings and dispatches each
//! command to the case runner.

use std::time::Duration;

use crate::commands::Commands;
use crate::common::config::EngineConfig;
use crate::common::{Error, Result};
use crate::testing;

/// What a finished command reports back to `main`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
}

fn seconds_flag(flag: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::Config(format!("--{} must be a non-negative number, got {}", flag, value)))
}

/// Apply the override flags shared by `run` and `batch`
fn apply_overrides(
    mut engine: EngineConfig,
    timeout: Option<f64>,
    poll_frames: Option<u32>,
    gap: Option<f64>,
) -> Result<EngineConfig> {
    if let Some(timeout) = timeout {
        let timeout = seconds_flag("timeout", timeout)?;
        if timeout.is_zero() {
            return Err(Error::Config("--timeout must be greater than zero".to_string()));
        }
        engine = engine.with_wait_timeout(timeout);
    }
    if let Some(frames) = poll_frames {
        if frames == 0 {
            return Err(Error::Config("--poll-frames must be at least 1".to_string()));
        }
        engine = engine.with_poll_interval_frames(frames);
    }
    if let Some(gap) = gap {
        engine = engine.with_case_gap(seconds_flag("gap", gap)?);
    }
    Ok(engine)
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, engine: EngineConfig) -> Result<Outcome> {
    match command {
        Commands::Run {
            case,
            scene,
            timeout,
            poll_frames,
            json,
        } => {
            let engine = apply_overrides(engine, timeout, poll_frames, None)?;
            let summary = testing::run_case_file(&case, scene.as_deref(), &engine, json).await?;
            Ok(if summary.success {
                Outcome::Passed
            } else {
                Outcome::Failed
            })
        }

        Commands::Batch {
            cases,
            scene,
            gap,
            timeout,
            json,
        } => {
            let engine = apply_overrides(engine, timeout, None, gap)?;
            let report = testing::run_batch_files(&cases, scene.as_deref(), &engine, json).await?;
            Ok(if report.success() {
                Outcome::Passed
            } else {
                Outcome::Failed
            })
        }

        Commands::Validate { cases } => {
            let invalid = testing::validate_files(&cases);
            if invalid == 0 {
                println!("{} file(s) valid", cases.len());
                Ok(Outcome::Passed)
            } else {
                println!("{} of {} file(s) invalid", invalid, cases.len());
                Ok(Outcome::Failed)
            }
        }
    }
}
