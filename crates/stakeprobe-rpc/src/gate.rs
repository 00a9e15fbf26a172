//! Epoch gate: blocking waits on network progress.
//!
//! The gate never gives up. Finality timing on a live network is
//! unpredictable; callers that need a bound wrap the future in
//! `tokio::time::timeout`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::RpcClient;
use crate::error::Result;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Source of epoch and liveness observations.
#[async_trait]
pub trait EpochSource: Send + Sync {
    /// Current epoch of the observed shard.
    async fn current_epoch(&self) -> Result<u64>;

    /// Whether the shard is strictly past epoch `n`. Fails closed.
    async fn is_after_epoch(&self, n: u64) -> bool {
        matches!(self.current_epoch().await, Ok(epoch) if epoch > n)
    }

    /// Whether the shard produced a header within `tolerance` of now.
    async fn is_active(&self, tolerance: Duration) -> bool;
}

#[async_trait]
impl EpochSource for RpcClient {
    async fn current_epoch(&self) -> Result<u64> {
        RpcClient::current_epoch(self).await
    }

    async fn is_after_epoch(&self, n: u64) -> bool {
        RpcClient::is_after_epoch(self, n).await
    }

    async fn is_active(&self, tolerance: Duration) -> bool {
        RpcClient::is_active(self, tolerance).await
    }
}

/// Polling wait primitive over an [`EpochSource`].
#[derive(Debug, Clone)]
pub struct EpochGate<S> {
    source: S,
    poll_interval: Duration,
}

impl<S: EpochSource> EpochGate<S> {
    /// Create a gate with the default poll interval.
    pub fn new(source: S) -> Self {
        Self::with_poll_interval(source, DEFAULT_POLL_INTERVAL)
    }

    /// Create a gate with a custom poll interval.
    pub fn with_poll_interval(source: S, poll_interval: Duration) -> Self {
        Self {
            source,
            poll_interval,
        }
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Block until the observed epoch strictly exceeds `n`.
    pub async fn wait_until_after_epoch(&self, n: u64) {
        if self.source.is_after_epoch(n).await {
            return;
        }
        let target = n.saturating_add(1);
        info!(epoch = target, "waiting for epoch (or later)");
        let mut polls: u64 = 1;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if self.source.is_after_epoch(n).await {
                debug!(target_epoch = target, polls, "epoch reached");
                return;
            }
            polls += 1;
            debug!(target_epoch = target, polls, "epoch not reached yet");
        }
    }

    /// Block until the shard reports a header fresher than `tolerance`.
    pub async fn wait_until_active(&self, tolerance: Duration) {
        while !self.source.is_active(tolerance).await {
            debug!(?tolerance, "shard not active yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Epoch advances by one on every observation; the first `failures`
    /// observations fail with a transport error.
    struct TickingSource {
        epoch: AtomicU64,
        failures: AtomicU64,
        calls: Arc<AtomicU64>,
    }

    impl TickingSource {
        fn new(start: u64, failures: u64) -> Self {
            Self {
                epoch: AtomicU64::new(start),
                failures: AtomicU64::new(failures),
                calls: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    #[async_trait]
    impl EpochSource for TickingSource {
        async fn current_epoch(&self) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(RpcError::Transport("connection reset".into()));
            }
            Ok(self.epoch.fetch_add(1, Ordering::SeqCst))
        }

        async fn is_active(&self, _tolerance: Duration) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) >= 2
        }
    }

    #[tokio::test]
    async fn test_returns_immediately_when_past_epoch() {
        let source = TickingSource::new(10, 0);
        let calls = source.calls.clone();
        let gate = EpochGate::with_poll_interval(source, Duration::from_millis(1));
        gate.wait_until_after_epoch(3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waits_until_epoch_exceeded() {
        // Observed epochs: 0, 1, 2, 3 -> the fourth poll is past epoch 2.
        let source = TickingSource::new(0, 0);
        let calls = source.calls.clone();
        let gate = EpochGate::with_poll_interval(source, Duration::from_millis(1));
        gate.wait_until_after_epoch(2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let source = TickingSource::new(5, 3);
        let calls = source.calls.clone();
        let gate = EpochGate::with_poll_interval(source, Duration::from_millis(1));
        gate.wait_until_after_epoch(0).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_until_active() {
        let source = TickingSource::new(0, 0);
        let calls = source.calls.clone();
        let gate = EpochGate::with_poll_interval(source, Duration::from_millis(1));
        gate.wait_until_active(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gate_never_gives_up_on_its_own() {
        let source = TickingSource::new(0, u64::MAX);
        let gate = EpochGate::with_poll_interval(source, Duration::from_millis(1));
        let waited =
            tokio::time::timeout(Duration::from_millis(50), gate.wait_until_after_epoch(0)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_wait_past_last_epoch_keeps_polling() {
        let source = TickingSource::new(0, 0);
        let calls = source.calls.clone();
        let gate = EpochGate::with_poll_interval(source, Duration::from_millis(1));
        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            gate.wait_until_after_epoch(u64::MAX),
        )
        .await;
        assert!(waited.is_err());
        assert!(calls.load(Ordering::SeqCst) > 1);
    }
}
