//! Cooperative frame scheduler and cancellation token

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Host tick scheduler
///
/// One frame is one suspension of the calling task for `interval`. All
/// engine polling is expressed in frames so the cadence follows the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frames {
    interval: Duration,
}

impl Frames {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Length of one frame
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Yield control for one frame
    pub async fn tick(&self) {
        tokio::time::sleep(self.interval).await;
    }

    /// Yield control for `count` frames (at least one)
    pub async fn ticks(&self, count: u32) {
        for _ in 0..count.max(1) {
            self.tick().await;
        }
    }
}

impl Default for Frames {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

/// Cancellation flag observed by a driving task
///
/// Clones share the flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the flag, waking every task waiting in [`CancelToken::cancelled`]
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once tripped
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_advance_by_frame_interval() {
        let frames = Frames::new(Duration::from_millis(16));
        let start = Instant::now();
        frames.ticks(10).await;
        assert_eq!(start.elapsed(), Duration::from_millis(160));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ticks_still_yields_once() {
        let frames = Frames::default();
        let start = Instant::now();
        frames.ticks(0).await;
        assert_eq!(start.elapsed(), Duration::from_millis(16));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        assert!(!token.is_cancelled());
        token.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_tripped() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
