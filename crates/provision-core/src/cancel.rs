//! Cancellable execution context.
//!
//! A `Cancellation` is threaded through every point where the engine can
//! suspend: remote fetch waits, backoff sleeps between attempts, and
//! subprocesses spawned by actions. It ends either because the paired
//! `CancelHandle` fired or because its deadline passed; both are reported as
//! a `Cancelled` cause so callers can stop immediately instead of retrying.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// The paired `CancelHandle` was fired (e.g. Ctrl-C).
    Requested,
    /// The context deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cancelled::Requested => write!(f, "cancelled"),
            Cancelled::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl std::error::Error for Cancelled {}

/// Write side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal every clone of the paired `Cancellation`. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Read side of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Create a linked handle/context pair with no deadline.
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Cancellation {
                rx: Some(rx),
                deadline: None,
            },
        )
    }

    /// A context that never ends.
    pub fn never() -> Self {
        Self::default()
    }

    /// Attach a deadline. An existing earlier deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Report the cancellation cause without waiting.
    pub fn check(&self) -> Result<(), Cancelled> {
        if let Some(rx) = &self.rx {
            if *rx.borrow() {
                return Err(Cancelled::Requested);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Cancelled::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Resolve once the context ends. Pending forever for `never()`.
    pub async fn cancelled(&self) -> Cancelled {
        let requested = async {
            if let Some(mut rx) = self.rx.clone() {
                // Err means every handle was dropped without firing.
                if rx.wait_for(|fired| *fired).await.is_ok() {
                    return;
                }
            }
            std::future::pending::<()>().await
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = requested => Cancelled::Requested,
                _ = tokio::time::sleep_until(deadline) => Cancelled::DeadlineExceeded,
            },
            None => {
                requested.await;
                Cancelled::Requested
            }
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            cause = self.cancelled() => Err(cause),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        self.check()?;
        tokio::select! {
            biased;
            cause = self.cancelled() => Err(cause),
            out = fut => Ok(out),
        }
    }
}
