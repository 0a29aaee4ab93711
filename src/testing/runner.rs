//! Case file runner
//!
//! Loads case files, builds an in-memory host from a scene fixture and runs
//! the cases through the engine, printing progress as steps finish.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;

use super::config::{load_case, LoadedCase};
use crate::common::config::EngineConfig;
use crate::common::{Error, Result};
use crate::engine::batch::describe_gap;
use crate::engine::{
    run_batch, BatchReport, CancelToken, CaseObserver, CaseReport, Environment, RunPhase,
    RunState, Runner, StepContext, StepOutcome, TestCase, Waiter,
};
use crate::host::{Host, MemoryHost, SceneFixture};

/// Result of running one case file
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub name: String,
    pub success: bool,
    pub failure_message: Option<String>,
    pub steps_total: usize,
    pub steps: Vec<StepOutcome>,
}

/// Console output for case progress
///
/// With `quiet` set nothing is printed; used when the report goes to stdout
/// as JSON.
pub struct ConsolePrinter {
    quiet: bool,
    steps_total: usize,
}

impl ConsolePrinter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            steps_total: 0,
        }
    }

    fn outcome(&self, outcome: &StepOutcome) {
        if self.quiet {
            return;
        }
        let elapsed = format!("({:.2}s)", outcome.elapsed.as_secs_f64());
        if outcome.success {
            println!(
                "  {} Step {}: {} {}",
                "✓".green(),
                outcome.index + 1,
                outcome.note,
                elapsed.dimmed()
            );
        } else {
            println!(
                "  {} Step {}: {} {}",
                "✗".red(),
                outcome.index + 1,
                outcome.note,
                elapsed.dimmed()
            );
            if let Some(message) = &outcome.error_message {
                println!("      {}", message.red());
            }
        }
    }

    fn header(&self, case: &TestCase) {
        if self.quiet {
            return;
        }
        println!("\n{} {}", "Running Test:".blue().bold(), case.name.white().bold());
        if let Some(desc) = &case.description {
            println!("  {}", desc.dimmed());
        }
        println!("\n{}", "Steps:".cyan());
    }

    fn verdict(&self, success: bool, skipped: usize) {
        if self.quiet {
            return;
        }
        if skipped > 0 {
            println!("  {}", format!("{} step(s) not run", skipped).dimmed());
        }
        if success {
            println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());
        } else {
            println!("\n{} {}\n", "✗".red().bold(), "Test Failed".red().bold());
        }
    }
}

impl CaseObserver for ConsolePrinter {
    fn case_started(&mut self, case: &TestCase) {
        self.steps_total = case.steps.len();
        self.header(case);
    }

    fn step_finished(&mut self, outcome: &StepOutcome) {
        self.outcome(outcome);
    }

    fn case_finished(&mut self, report: &CaseReport) {
        let skipped = self.steps_total.saturating_sub(report.outcomes.len());
        self.verdict(report.success(), skipped);
    }
}

/// Build the host for a run: the explicit fixture, else the case's own
fn build_host(scene: Option<&Path>, case_fixture: Option<&Path>) -> Result<Arc<MemoryHost>> {
    let fixture = match scene.or(case_fixture) {
        Some(path) => {
            tracing::debug!(fixture = %path.display(), "Loading scene fixture");
            SceneFixture::load(path)?
        }
        None => {
            tracing::debug!("No scene fixture, running against an empty host");
            SceneFixture::default()
        }
    };
    Ok(Arc::new(MemoryHost::new(fixture)))
}

/// Run one case file through a [`Runner`]
///
/// Progress is printed from the runner's published state. Ctrl-C resets the
/// runner and returns [`Error::Cancelled`].
pub async fn run_case_file(
    path: &Path,
    scene: Option<&Path>,
    config: &EngineConfig,
    json: bool,
) -> Result<RunSummary> {
    let LoadedCase { case, fixture, .. } = load_case(path)?;
    let host = build_host(scene, fixture.as_deref())?;
    let printer = ConsolePrinter::new(json);
    printer.header(&case);

    let steps_total = case.steps.len();
    let name = case.name.clone();
    let env = Arc::new(Environment::new());
    let runner = Runner::new(env.clone(), *config)?;

    // The case waits in Preparing until the host is handed over
    runner.set_test_case(case)?;
    env.ready(host as Arc<dyn Host>)?;

    let state = tokio::select! {
        state = follow(&runner, &printer) => state?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, resetting runner");
            runner.reset();
            env.tear_down();
            return Err(Error::Cancelled);
        }
    };
    env.tear_down();

    let success = state.phase == RunPhase::Finished { success: true };
    printer.verdict(success, steps_total.saturating_sub(state.outcomes.len()));

    let summary = RunSummary {
        name,
        success,
        failure_message: state.failure_message,
        steps_total,
        steps: state.outcomes,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(summary)
}

/// Print outcomes as they are published until the runner settles
async fn follow(runner: &Runner, printer: &ConsolePrinter) -> Result<RunState> {
    let mut rx = runner.subscribe();
    let mut printed = 0;
    loop {
        let state = rx.borrow_and_update().clone();
        for outcome in state.outcomes.iter().skip(printed) {
            printer.outcome(outcome);
        }
        printed = state.outcomes.len();
        if state.phase.is_settled() {
            return Ok(state);
        }
        rx.changed()
            .await
            .map_err(|e| Error::Internal(format!("run state channel closed: {}", e)))?;
    }
}

/// Run several case files in order against one shared host
///
/// The host comes from `scene`, else from the first case that names a
/// fixture. Ctrl-C cancels the batch after the current step.
pub async fn run_batch_files(
    paths: &[PathBuf],
    scene: Option<&Path>,
    config: &EngineConfig,
    json: bool,
) -> Result<BatchReport> {
    let loaded = paths
        .iter()
        .map(|p| load_case(p))
        .collect::<Result<Vec<_>>>()?;

    let first_fixture = loaded.iter().find_map(|l| l.fixture.as_deref());
    if scene.is_none() {
        for l in &loaded {
            if l.fixture.is_some() && l.fixture.as_deref() != first_fixture {
                tracing::warn!(
                    case = %l.case.name,
                    "Case names a different fixture; the batch shares one host"
                );
            }
        }
    }
    let host = build_host(scene, first_fixture)?;
    let cases: Vec<TestCase> = loaded.into_iter().map(|l| l.case).collect();

    if !json {
        println!(
            "{} {} case(s), {} between cases",
            "Batch:".blue().bold(),
            cases.len(),
            describe_gap(config.case_gap)
        );
    }

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling batch");
                cancel.cancel();
            }
        })
    };

    let ctx = StepContext::new(host, Waiter::from_config(config));
    let mut printer = ConsolePrinter::new(json);
    let report = run_batch(&cases, &ctx, config, &cancel, &mut printer).await;
    interrupt.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_batch_summary(&report);
    }
    Ok(report)
}

fn print_batch_summary(report: &BatchReport) {
    println!("{}", "Summary:".cyan());
    for case in &report.cases {
        if case.success() {
            println!("  {} {}", "✓".green(), case.name);
        } else {
            let message = match case.abort_error() {
                Some(abort) => abort.to_string(),
                None => format!(
                    "{}: {}",
                    case.name,
                    case.failure_message().unwrap_or("cancelled")
                ),
            };
            println!("  {} {}", "✗".red(), message.dimmed());
        }
    }
    if report.cancelled {
        println!("  {}", "batch cancelled".yellow());
    }
    let line = format!("{} passed, {} failed", report.passed(), report.failed());
    if report.success() {
        println!("\n{}\n", line.green().bold());
    } else {
        println!("\n{}\n", line.red().bold());
    }
}

/// Check that case files parse and convert; returns the number of invalid files
pub fn validate_files(paths: &[PathBuf]) -> usize {
    let mut invalid = 0;
    for path in paths {
        match load_case(path) {
            Ok(loaded) => {
                let fixture = match &loaded.fixture {
                    Some(f) => SceneFixture::load(f).map(|_| ()),
                    None => Ok(()),
                };
                match fixture {
                    Ok(()) => println!(
                        "  {} {} ({} steps)",
                        "✓".green(),
                        path.display(),
                        loaded.case.steps.len()
                    ),
                    Err(e) => {
                        invalid += 1;
                        println!("  {} {}: {}", "✗".red(), path.display(), e);
                    }
                }
            }
            Err(e) => {
                invalid += 1;
                println!("  {} {}: {}", "✗".red(), path.display(), e);
            }
        }
    }
    invalid
}
