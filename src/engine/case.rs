//! Test cases
//!
//! A [`TestCase`] runs its steps strictly in order through the executor and
//! applies the stop-on-error policy. Progress is reported to a
//! [`CaseObserver`] so callers (the runner, the CLI) can publish it.

use std::time::Duration;

use serde::Serialize;

use super::executor::{run_step_with_timeout, StepOutcome, StepRun};
use super::frames::CancelToken;
use super::step::{Step, StepContext};
use crate::common::Error;

/// An ordered list of steps with an error policy
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub description: Option<String>,
    /// Stop at the first failing step (default) or keep going
    pub stop_on_error: bool,
    pub steps: Vec<Step>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: None,
            stop_on_error: true,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Run every step in order
    ///
    /// One frame is yielded between steps. Each step's outcome is reported
    /// before the next step starts. Cancellation is checked while a step is
    /// in flight and between steps.
    pub async fn run(
        &self,
        ctx: &StepContext,
        ambient: Duration,
        cancel: &CancelToken,
        observer: &mut dyn CaseObserver,
    ) -> CaseReport {
        tracing::info!(case = %self.name, steps = self.steps.len(), "Running test case");
        observer.case_started(self);
        let mut outcomes = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            if index > 0 {
                let frames = ctx.frames();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return self.report(observer, outcomes, CaseEnd::Cancelled),
                    _ = frames.tick() => {}
                }
            }

            observer.step_started(index, step);
            let outcome = match run_step_with_timeout(step, index, ctx, ambient, cancel).await {
                StepRun::Completed(outcome) => outcome,
                StepRun::Cancelled => return self.report(observer, outcomes, CaseEnd::Cancelled),
            };
            observer.step_finished(&outcome);

            let failed = !outcome.success;
            let message = outcome.error_message.clone().unwrap_or_default();
            outcomes.push(outcome);

            if failed && self.stop_on_error {
                tracing::warn!(case = %self.name, index, "Stopping test case after failed step");
                return self.report(
                    observer,
                    outcomes,
                    CaseEnd::Aborted {
                        step: index,
                        message,
                    },
                );
            }
        }

        self.report(observer, outcomes, CaseEnd::Completed)
    }

    fn report(
        &self,
        observer: &mut dyn CaseObserver,
        outcomes: Vec<StepOutcome>,
        end: CaseEnd,
    ) -> CaseReport {
        let report = CaseReport {
            name: self.name.clone(),
            outcomes,
            end,
        };
        tracing::info!(
            case = %self.name,
            success = report.success(),
            executed = report.outcomes.len(),
            "Test case finished"
        );
        observer.case_finished(&report);
        report
    }
}

/// Progress callbacks from a running case
pub trait CaseObserver: Send {
    /// Called before the first step
    fn case_started(&mut self, _case: &TestCase) {}

    /// Called right before step `index` starts
    fn step_started(&mut self, _index: usize, _step: &Step) {}

    /// Called once per executed step, before the next one starts
    fn step_finished(&mut self, _outcome: &StepOutcome) {}

    /// Called once with the final report
    fn case_finished(&mut self, _report: &CaseReport) {}
}

impl CaseObserver for () {}

/// How a case run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseEnd {
    /// Every step ran (some may have failed without stop-on-error)
    Completed,
    /// Stopped early at `step` because of stop-on-error
    Aborted { step: usize, message: String },
    /// The run was cancelled
    Cancelled,
}

/// Everything a case run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub outcomes: Vec<StepOutcome>,
    pub end: CaseEnd,
}

impl CaseReport {
    /// Ran to the end with every step passing
    pub fn success(&self) -> bool {
        self.end == CaseEnd::Completed && self.outcomes.iter().all(|o| o.success)
    }

    /// Message of the first failing step
    pub fn failure_message(&self) -> Option<&str> {
        self.outcomes
            .iter()
            .find(|o| !o.success)
            .and_then(|o| o.error_message.as_deref())
    }

    /// The stop-on-error abort as an error, when the case stopped early
    pub fn abort_error(&self) -> Option<Error> {
        match &self.end {
            CaseEnd::Aborted { step, message } => Some(Error::CaseAborted {
                case: self.name.clone(),
                step: step + 1,
                message: message.clone(),
            }),
            _ => None,
        }
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Error, Result};
    use crate::engine::frames::Frames;
    use crate::engine::step::StepBody;
    use crate::engine::waiter::Waiter;
    use crate::host::MemoryHost;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::time::Instant;

    struct Fails;

    #[async_trait]
    impl StepBody for Fails {
        fn name(&self) -> String {
            "fails".to_string()
        }

        async fn run(&self, ctx: &StepContext) -> Result<()> {
            ctx.frames().ticks(2).await;
            Err(Error::action_failed("press", "Canvas/Play", "host refused"))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl CaseObserver for Recorder {
        fn step_started(&mut self, index: usize, _step: &Step) {
            self.events.push(format!("start {}", index));
        }

        fn step_finished(&mut self, outcome: &StepOutcome) {
            self.events.push(format!("end {} {}", outcome.index, outcome.success));
        }
    }

    fn ctx() -> StepContext {
        StepContext::new(
            Arc::new(MemoryHost::empty()),
            Waiter::new(Duration::from_secs(10), 10, Frames::default()),
        )
    }

    fn pass_fail_pass(stop_on_error: bool) -> TestCase {
        TestCase::new(
            "pass-fail-pass",
            vec![
                Step::log("one"),
                Step::custom(Arc::new(Fails)),
                Step::log("three"),
            ],
        )
        .with_stop_on_error(stop_on_error)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_error_stops_after_failure() {
        let mut recorder = Recorder::default();
        let report = pass_fail_pass(true)
            .run(&ctx(), Duration::from_secs(10), &CancelToken::new(), &mut recorder)
            .await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.success());
        assert_eq!(
            report.end,
            CaseEnd::Aborted {
                step: 1,
                message: "press failed on 'Canvas/Play': host refused".to_string()
            }
        );
        assert_eq!(recorder.events, vec!["start 0", "end 0 true", "start 1", "end 1 false"]);
        assert_eq!(
            report.abort_error().map(|e| e.to_string()).as_deref(),
            Some("Test case 'pass-fail-pass' aborted at step 2: press failed on 'Canvas/Play': host refused")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_error_runs_everything() {
        let report = pass_fail_pass(false)
            .run(&ctx(), Duration::from_secs(10), &CancelToken::new(), &mut ())
            .await;

        let results: Vec<bool> = report.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(results, vec![true, false, true]);
        assert_eq!(report.end, CaseEnd::Completed);
        assert!(!report.success());
        assert_eq!(report.failure_message(), Some("press failed on 'Canvas/Play': host refused"));
        assert_eq!((report.passed(), report.failed()), (2, 1));
        assert!(report.abort_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_frame_between_steps() {
        let case = TestCase::new("logs", vec![Step::log("a"), Step::log("b"), Step::log("c")]);
        let start = Instant::now();
        let report = case
            .run(&ctx(), Duration::from_secs(10), &CancelToken::new(), &mut ())
            .await;
        assert!(report.success());
        assert_eq!(start.elapsed(), Duration::from_millis(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_steps() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = TestCase::new("logs", vec![Step::log("a"), Step::log("b")])
            .run(&ctx(), Duration::from_secs(10), &cancel, &mut ())
            .await;
        assert_eq!(report.end, CaseEnd::Cancelled);
        assert!(report.outcomes.is_empty());
    }
}
