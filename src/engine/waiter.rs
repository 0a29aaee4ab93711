//! Condition waiter
//!
//! Polls a [`Condition`] every few frames until it holds or the wait timeout
//! passes. This is the only place a wait deadline is measured.

use std::future::Future;
use std::panic::Location;
use std::time::Duration;

use tokio::time::Instant;

use super::condition::Condition;
use super::frames::Frames;
use crate::common::config::EngineConfig;
use crate::common::{Error, Result};
use crate::host::Host;

/// Statistics of a satisfied wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStats {
    /// Number of times the condition was evaluated
    pub checks: u32,
    /// Time from the start of the wait to the satisfying check
    pub elapsed: Duration,
}

/// Drives conditions to satisfaction
///
/// A waiter holds only settings, so any number of waits may run
/// concurrently off copies of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waiter {
    timeout: Duration,
    poll_interval_frames: u32,
    frames: Frames,
}

impl Waiter {
    pub fn new(timeout: Duration, poll_interval_frames: u32, frames: Frames) -> Self {
        Self {
            timeout,
            poll_interval_frames: poll_interval_frames.max(1),
            frames,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.wait_timeout,
            config.poll_interval_frames,
            Frames::new(config.frame_interval),
        )
    }

    /// Same waiter with another timeout; zero keeps the current one
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval_frames(&self) -> u32 {
        self.poll_interval_frames
    }

    pub fn frames(&self) -> Frames {
        self.frames
    }

    /// Wait until `condition` holds
    ///
    /// Timeout messages carry the source location of the wait call and
    /// `label` (usually the step being executed). The location is tracked
    /// through [`StepContext::wait_for`](super::StepContext::wait_for), so a
    /// custom step body reports its own line. Built-in steps report the
    /// engine's line and rely on the label.
    #[track_caller]
    pub fn wait<'a>(
        self,
        host: &'a dyn Host,
        condition: &'a mut dyn Condition,
        label: Option<&'a str>,
    ) -> impl Future<Output = Result<WaitStats>> + Send + 'a {
        let location = Location::caller();
        async move {
            let origin = match label {
                Some(label) => format!("{} ({})", location, label),
                None => location.to_string(),
            };
            self.poll(host, condition, origin).await
        }
    }

    async fn poll(
        self,
        host: &dyn Host,
        condition: &mut dyn Condition,
        origin: String,
    ) -> Result<WaitStats> {
        let start = Instant::now();
        let mut checks = 0u32;

        loop {
            checks += 1;
            if condition.satisfied(host) {
                let stats = WaitStats {
                    checks,
                    elapsed: start.elapsed(),
                };
                tracing::debug!(
                    checks,
                    elapsed_ms = stats.elapsed.as_millis() as u64,
                    condition = %condition.describe(),
                    "Condition satisfied"
                );
                return Ok(stats);
            }

            let elapsed = start.elapsed();
            if elapsed > self.timeout {
                let condition = condition.describe();
                tracing::warn!(
                    checks,
                    elapsed_ms = elapsed.as_millis() as u64,
                    %origin,
                    "Timed out waiting for {}",
                    condition
                );
                return Err(Error::WaitTimeout {
                    condition,
                    origin,
                    checks,
                    elapsed,
                });
            }

            self.frames.ticks(self.poll_interval_frames).await;
        }
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::condition::{ObjectAppeared, Predicate};
    use crate::host::{MemoryHost, SceneFixture};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn waiter(timeout_ms: u64) -> Waiter {
        Waiter::new(
            Duration::from_millis(timeout_ms),
            10,
            Frames::new(Duration::from_millis(16)),
        )
    }

    fn delayed_host(after_ms: u64) -> MemoryHost {
        let yaml = format!(
            "elements:\n  - path: Panel\n    active: false\ntimeline:\n  - after_ms: {}\n    effects:\n      - {{ type: activate, target: Panel }}\n",
            after_ms
        );
        MemoryHost::new(SceneFixture::from_yaml(&yaml).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_immediately_takes_one_check() {
        let host = delayed_host(0);
        let mut cond = ObjectAppeared::new("Panel");
        let stats = waiter(1000).wait(&host, &mut cond, None).await.unwrap();
        assert_eq!(stats.checks, 1);
        assert_eq!(stats.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_before_timeout_returns_at_next_poll() {
        let host = delayed_host(500);
        let mut cond = ObjectAppeared::new("Panel");
        let start = Instant::now();
        let stats = waiter(2000).wait(&host, &mut cond, None).await.unwrap();

        // Polls land every 160ms: the first one at or after 500ms is 640ms
        assert_eq!(stats.elapsed, Duration::from_millis(640));
        assert_eq!(stats.checks, 5);
        assert!(start.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_satisfied_times_out_no_earlier_than_timeout() {
        let host = delayed_host(60_000);
        let mut cond = ObjectAppeared::new("Panel");
        let err = waiter(1000)
            .wait(&host, &mut cond, Some("step 1 'Open panel'"))
            .await
            .unwrap_err();

        match err {
            Error::WaitTimeout {
                condition,
                origin,
                elapsed,
                checks,
            } => {
                assert!(elapsed >= Duration::from_millis(1000));
                assert_eq!(checks, 8);
                assert!(condition.contains("ObjectAppeared(Panel)"));
                assert!(origin.contains("waiter.rs"));
                assert!(origin.contains("step 1 'Open panel'"));
            }
            other => panic!("expected wait timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cadence_follows_interval_frames() {
        let host = MemoryHost::empty();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut cond = Predicate::new(
            "third call",
            Arc::new(move |_: &dyn Host| counter.fetch_add(1, Ordering::SeqCst) >= 2),
        );

        let w = Waiter::new(Duration::from_secs(5), 3, Frames::new(Duration::from_millis(10)));
        let stats = w.wait(&host, &mut cond, None).await.unwrap();
        assert_eq!(stats.checks, 3);
        assert_eq!(stats.elapsed, Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waits_are_independent() {
        let host = Arc::new(delayed_host(300));
        let w = waiter(5000);

        let a = {
            let host = host.clone();
            tokio::spawn(async move {
                let mut cond = ObjectAppeared::new("Panel");
                w.wait(host.as_ref(), &mut cond, None).await
            })
        };
        let b = {
            let host = host.clone();
            tokio::spawn(async move {
                let mut cond = ObjectAppeared::new("Missing");
                waiter(200).wait(host.as_ref(), &mut cond, None).await
            })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().unwrap_err().is_timeout());
    }

    #[test]
    fn test_with_zero_timeout_keeps_ambient() {
        let w = Waiter::default().with_timeout(Duration::ZERO);
        assert_eq!(w.timeout(), Duration::from_secs(10));
        assert_eq!(w.with_timeout(Duration::from_secs(3)).timeout(), Duration::from_secs(3));
    }
}
