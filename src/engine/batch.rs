//! Batch runs
//!
//! Runs several test cases one after the other against the same host, with
//! a gap between consecutive cases.

use std::time::Duration;

use serde::Serialize;

use super::case::{CaseEnd, CaseObserver, CaseReport, TestCase};
use super::frames::CancelToken;
use super::step::StepContext;
use crate::common::config::EngineConfig;

/// Reports of every case that ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub cases: Vec<CaseReport>,
    /// Set when the batch was cancelled before every case ran
    pub cancelled: bool,
}

impl BatchReport {
    pub fn success(&self) -> bool {
        !self.cancelled && self.cases.iter().all(CaseReport::success)
    }

    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }
}

/// Run `cases` strictly in order
///
/// `config.case_gap` is waited between two cases, never before the first or
/// after the last. Each case gets `config.step_timeout` as its ambient step
/// timeout.
pub async fn run_batch(
    cases: &[TestCase],
    ctx: &StepContext,
    config: &EngineConfig,
    cancel: &CancelToken,
    observer: &mut dyn CaseObserver,
) -> BatchReport {
    let mut report = BatchReport::default();
    tracing::info!(cases = cases.len(), gap_ms = config.case_gap.as_millis() as u64, "Running batch");

    for (i, case) in cases.iter().enumerate() {
        if i > 0 && !config.case_gap.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(config.case_gap) => {}
            }
        }

        let case_report = case.run(ctx, config.step_timeout, cancel, observer).await;
        let cancelled = case_report.end == CaseEnd::Cancelled;
        report.cases.push(case_report);
        if cancelled {
            report.cancelled = true;
            break;
        }
    }

    tracing::info!(
        passed = report.passed(),
        failed = report.failed(),
        cancelled = report.cancelled,
        "Batch finished"
    );
    report
}

/// Gap between cases as configured, for display
pub fn describe_gap(gap: Duration) -> String {
    format!("{:.2}s", gap.as_secs_f64())
}
