//! Step executor
//!
//! Drives one step under its effective timeout and turns whatever happens
//! (success, error, panic, expired budget) into a [`StepOutcome`]. Nothing a
//! step does escapes this boundary as an error.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use super::frames::CancelToken;
use super::step::{Step, StepContext};
use crate::common::{Error, ErrorKind};

/// Result of one executed step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    /// Zero-based position of the step in its case
    pub index: usize,
    /// Display label of the step
    pub note: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// How driving a step ended
#[derive(Debug, Clone, PartialEq)]
pub enum StepRun {
    /// The step finished, passed or failed
    Completed(StepOutcome),
    /// The run was cancelled while the step was in flight
    Cancelled,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drive `step` to completion within its effective timeout
///
/// The step's own timeout wins when set; otherwise `ambient` applies. When a
/// wait inside the step and the step budget expire on the same poll, the
/// wait's timeout is reported because the step future is polled first.
pub async fn run_step_with_timeout(
    step: &Step,
    index: usize,
    ctx: &StepContext,
    ambient: Duration,
    cancel: &CancelToken,
) -> StepRun {
    let budget = step.effective_timeout(ambient);
    let note = step.to_string();
    let ctx = ctx.labelled(format!("step {} '{}'", index + 1, note));
    let start = Instant::now();

    tracing::debug!(
        index,
        step = %note,
        timeout_ms = budget.as_millis() as u64,
        "Executing step"
    );

    let body = AssertUnwindSafe(step.execute(&ctx)).catch_unwind();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(index, step = %note, "Step cancelled");
            return StepRun::Cancelled;
        }
        r = tokio::time::timeout(budget, body) => match r {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(Error::StepPanicked(panic_message(payload))),
            Err(_) => Err(Error::StepTimeout {
                step: note.clone(),
                timeout: budget,
            }),
        },
    };

    let elapsed = start.elapsed();
    let outcome = match result {
        Ok(()) => {
            tracing::info!(index, step = %note, elapsed_ms = elapsed.as_millis() as u64, "Step passed");
            StepOutcome {
                index,
                note,
                success: true,
                error_message: None,
                error_kind: None,
                elapsed,
            }
        }
        Err(e) => {
            tracing::warn!(
                index,
                step = %note,
                elapsed_ms = elapsed.as_millis() as u64,
                kind = %e.kind(),
                "Step failed: {}",
                e
            );
            StepOutcome {
                index,
                note,
                success: false,
                error_message: Some(e.to_string()),
                error_kind: Some(e.kind()),
                elapsed,
            }
        }
    };
    StepRun::Completed(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Result;
    use crate::engine::condition::{ConditionSpec, MatchMode};
    use crate::engine::frames::Frames;
    use crate::engine::step::{StepBody, StepKind};
    use crate::engine::waiter::Waiter;
    use crate::host::{MemoryHost, Target};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Panics;

    #[async_trait]
    impl StepBody for Panics {
        fn name(&self) -> String {
            "panics".to_string()
        }

        async fn run(&self, ctx: &StepContext) -> Result<()> {
            ctx.frames().tick().await;
            panic!("widget exploded");
        }
    }

    fn ctx(wait_timeout: Duration) -> StepContext {
        StepContext::new(
            Arc::new(MemoryHost::empty()),
            Waiter::new(wait_timeout, 10, Frames::new(Duration::from_millis(16))),
        )
    }

    fn completed(run: StepRun) -> StepOutcome {
        match run {
            StepRun::Completed(outcome) => outcome,
            StepRun::Cancelled => panic!("step was cancelled"),
        }
    }

    fn never() -> Step {
        Step::wait_for(
            MatchMode::All,
            vec![ConditionSpec::ObjectAppeared(Target::parse("Nowhere"))],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_passing_step() {
        let ctx = ctx(Duration::from_secs(10));
        let outcome = completed(
            run_step_with_timeout(&Step::log("hello"), 0, &ctx, Duration::from_secs(10), &CancelToken::new())
                .await,
        );
        assert!(outcome.success);
        assert_eq!(outcome.note, "Log: hello");
        assert_eq!(outcome.error_message, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_inherits_ambient() {
        let ctx = ctx(Duration::from_secs(60));
        let step = Step::wait_time(Duration::from_secs(30));
        let outcome = completed(
            run_step_with_timeout(&step, 0, &ctx, Duration::from_secs(10), &CancelToken::new()).await,
        );
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(outcome.elapsed, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_timeout_beats_larger_ambient() {
        let ctx = ctx(Duration::from_secs(60));
        let step = never().with_timeout(Duration::from_secs(3));
        let outcome = completed(
            run_step_with_timeout(&step, 0, &ctx, Duration::from_secs(10), &CancelToken::new()).await,
        );
        assert!(!outcome.success);
        assert_eq!(outcome.elapsed, Duration::from_secs(3));
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("Step timed out after 3 seconds: Wait for ObjectAppeared(Nowhere)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_wait_timeout_reported_when_first() {
        let ctx = ctx(Duration::from_secs(1));
        let outcome = completed(
            run_step_with_timeout(&never(), 1, &ctx, Duration::from_secs(10), &CancelToken::new()).await,
        );
        assert!(!outcome.success);
        let message = outcome.error_message.unwrap();
        assert!(message.starts_with("Wait timed out"));
        assert!(message.contains("step 2 'Wait for ObjectAppeared(Nowhere)'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_wins_when_both_expire_on_same_poll() {
        // Polls land every 160ms, so the wait gives up at 1120ms (> 1s).
        // A step budget of exactly 1120ms expires on that same poll.
        let ctx = ctx(Duration::from_secs(1));
        let step = never().with_timeout(Duration::from_millis(1120));
        let outcome = completed(
            run_step_with_timeout(&step, 0, &ctx, Duration::from_secs(10), &CancelToken::new()).await,
        );
        assert!(outcome.error_message.unwrap().starts_with("Wait timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_captured() {
        let ctx = ctx(Duration::from_secs(1));
        let step = Step::custom(Arc::new(Panics));
        let outcome = completed(
            run_step_with_timeout(&step, 0, &ctx, Duration::from_secs(10), &CancelToken::new()).await,
        );
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("Step panicked: widget exploded"));
        assert_eq!(outcome.error_kind, Some(ErrorKind::Internal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_in_flight_step() {
        let ctx = ctx(Duration::from_secs(60));
        let cancel = CancelToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trip.cancel();
        });

        let start = Instant::now();
        let run = run_step_with_timeout(
            &Step::new(StepKind::WaitTime(Duration::from_secs(30))),
            0,
            &ctx,
            Duration::from_secs(60),
            &cancel,
        )
        .await;
        assert_eq!(run, StepRun::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_outcome_serializes_elapsed_ms() {
        let outcome = StepOutcome {
            index: 0,
            note: "Log: x".to_string(),
            success: false,
            error_message: Some("boom".to_string()),
            error_kind: Some(ErrorKind::ActionFailure),
            elapsed: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["error_kind"], "action_failure");
    }
}
