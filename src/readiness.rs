// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded, cancellable readiness waits
//!
//! Every place the orchestrator suspends on something outside the process
//! (a certificate file appearing, a socket accepting) goes through here.
//! A wait returns within its bound plus one poll interval, and returns
//! promptly once the [`Cancellation`] fires.

use std::path::Path;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use crate::error::{Result, RoostError};

/// Sending half of the cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half, cloned into every component that may suspend
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A linked pair
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancellation { rx })
    }

    /// A signal that never fires
    pub fn never() -> Cancellation {
        let (tx, rx) = watch::channel(false);
        // The sender is dropped; `cancelled()` stays pending forever.
        drop(tx);
        Cancellation { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Fail fast if already cancelled
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(RoostError::Cancelled {
                during: during.to_string(),
            });
        }
        Ok(())
    }

    /// Sleep that ends early on cancellation
    pub async fn sleep(&self, duration: Duration, during: &str) -> Result<()> {
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(RoostError::Cancelled { during: during.to_string() }),
        }
    }
}

/// Bound and poll interval for one wait
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub bound: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(bound: Duration, interval: Duration) -> Self {
        Self { bound, interval }
    }
}

/// Poll `check` until it succeeds, the bound elapses, or cancellation fires
async fn poll_until<F, Fut>(
    target: &str,
    policy: PollPolicy,
    cancel: &Cancellation,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + policy.bound;
    let mut attempts = 0u32;

    loop {
        cancel.check(&format!("waiting for {}", target))?;
        attempts += 1;
        if check().await {
            debug!(target = %target, attempts, "Ready");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(RoostError::ReadinessTimeout {
                target: target.to_string(),
                bound: policy.bound,
            });
        }
        cancel
            .sleep(policy.interval, &format!("waiting for {}", target))
            .await?;
    }
}

/// Wait for a file to exist
pub async fn wait_for_file(path: &Path, policy: PollPolicy, cancel: &Cancellation) -> Result<()> {
    let target = path.display().to_string();
    info!(path = %target, bound = ?policy.bound, "Waiting for file");
    poll_until(&target, policy, cancel, || async move {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    })
    .await
}

/// Wait for a TCP endpoint to accept a connection
pub async fn wait_for_tcp(
    addr: &str,
    connect_timeout: Duration,
    policy: PollPolicy,
    cancel: &Cancellation,
) -> Result<()> {
    info!(addr = %addr, bound = ?policy.bound, "Waiting for endpoint");
    poll_until(addr, policy, cancel, || async move {
        matches!(timeout(connect_timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    fn quick() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(300), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_file_already_present() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ca-cert.pem");
        std::fs::write(&path, "cert").unwrap();
        wait_for_file(&path, quick(), &Cancellation::never()).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_appears_later() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ca-cert.pem");
        let writer = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            std::fs::write(writer, "cert").unwrap();
        });
        let policy = PollPolicy::new(Duration::from_secs(2), Duration::from_millis(20));
        wait_for_file(&path, policy, &Cancellation::never()).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.pem");
        let policy = quick();

        let started = std::time::Instant::now();
        let err = wait_for_file(&path, policy, &Cancellation::never())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, RoostError::ReadinessTimeout { .. }));
        assert!(elapsed >= policy.bound);
        assert!(elapsed < policy.bound + policy.interval + Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.pem");
        let (handle, cancel) = Cancellation::new();
        let policy = PollPolicy::new(Duration::from_secs(30), Duration::from_millis(50));

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let started = std::time::Instant::now();
        let err = wait_for_file(&path, policy, &cancel).await.unwrap_err();
        assert!(matches!(err, RoostError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tcp_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        wait_for_tcp(&addr, Duration::from_millis(200), quick(), &Cancellation::never())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tcp_closed_port_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = wait_for_tcp(&addr, Duration::from_millis(50), quick(), &Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, RoostError::ReadinessTimeout { .. }));
    }
}
