//! Reconciliation loop primitives.
//!
//! The fleet protocol has exactly one give-up-and-try-later behavior:
//! unbounded retry with a fixed wait, never a deadline. This crate models it
//! as an explicit [`RetryPolicy`] instead of ad-hoc sleep loops, so the delay
//! is injectable (tests run with zero delay) and a shutdown signal can
//! interrupt a retry cleanly.
//!
//! # Invariants
//!
//! - Attempts are unbounded; the only exits are success or cancellation.
//! - The wait between attempts is fixed (no exponential backoff).

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

/// Default fixed delay between reconciliation ticks and retry attempts.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Retrying was interrupted by the shutdown signal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cancelled while retrying {operation}")]
pub struct Cancelled {
    pub operation: String,
}

/// Unbounded fixed-delay retry with cooperative cancellation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delay: Duration,
    shutdown: watch::Receiver<bool>,
    // Keeps the channel open when no external shutdown signal is wired in.
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl RetryPolicy {
    /// Policy driven by an external shutdown signal.
    pub fn new(delay: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            delay,
            shutdown,
            _keepalive: None,
        }
    }

    /// Policy that can only be stopped by dropping the future.
    pub fn unsignalled(delay: Duration) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            delay,
            shutdown: rx,
            _keepalive: Some(std::sync::Arc::new(tx)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// True once shutdown has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep one fixed delay, or bail out early on shutdown.
    pub async fn wait(&self, operation: &str) -> Result<(), Cancelled> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(Cancelled {
                operation: operation.to_string(),
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(()),
            changed = shutdown.changed() => {
                // A closed channel means the signal side is gone; keep going.
                if changed.is_ok() && *shutdown.borrow() {
                    Err(Cancelled { operation: operation.to_string() })
                } else {
                    tokio::time::sleep(self.delay).await;
                    Ok(())
                }
            }
        }
    }

    /// Run `op` until it succeeds, waiting the fixed delay between attempts.
    ///
    /// Every failure is logged with the operation name; there is no attempt
    /// cap. Returns `Err(Cancelled)` only when shutdown interrupts the wait.
    pub async fn run_until_ok<T, E, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> Result<T, Cancelled>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(operation, attempt, error = %e, "Attempt failed, will retry");
                }
            }
            self.wait(operation).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy() -> RetryPolicy {
        RetryPolicy::unsignalled(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_run_until_ok_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = instant_policy();

        let value = policy
            .run_until_ok("flaky", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_success_needs_no_wait() {
        let policy = RetryPolicy::unsignalled(Duration::from_secs(3600));
        let value = policy
            .run_until_ok("immediate", || async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_retry() {
        let (tx, rx) = watch::channel(false);
        let policy = RetryPolicy::new(Duration::from_secs(3600), rx);

        let handle = tokio::spawn(async move {
            policy
                .run_until_ok("doomed", || async { Err::<(), _>("always fails") })
                .await
        });

        tx.send(true).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.operation, "doomed");
    }

    #[tokio::test]
    async fn test_wait_fails_fast_when_already_cancelled() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let policy = RetryPolicy::new(Duration::from_secs(3600), rx);

        assert!(policy.is_cancelled());
        assert!(policy.wait("anything").await.is_err());
    }
}
