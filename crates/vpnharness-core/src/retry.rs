//! Fixed-interval retry/poll engine.
//!
//! Used to wait out boot time and eventual consistency. No backoff and no
//! jitter: the awaited conditions resolve in a bounded, roughly known window,
//! so a fixed interval keeps the worst case at `(attempts - 1) × delay` plus
//! operation time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::HarnessError;

/// Attempt budget and inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Fixed sleep between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn max_wait(&self) -> Duration {
        self.delay * self.attempts().saturating_sub(1)
    }
}

/// Cooperative cancellation shared by everything a run waits on.
///
/// Checked before every attempt and raced against every inter-attempt sleep.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // sender lives as long as any clone of the token; unreachable in practice
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last underlying error.
    Exhausted {
        label: String,
        attempts: u32,
        last_error: E,
    },
    /// The cancel token fired before an attempt succeeded.
    Cancelled { label: String, attempts: u32 },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                label,
                attempts,
                last_error,
            } => write!(
                f,
                "{} failed after {} attempt(s): {}",
                label, attempts, last_error
            ),
            RetryError::Cancelled { label, attempts } => {
                write!(f, "{} cancelled after {} attempt(s)", label, attempts)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl<E: fmt::Display> RetryError<E> {
    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Map into the run taxonomy (`RetryExhausted` / `Cancelled`).
    pub fn into_harness(self) -> HarnessError {
        match self {
            RetryError::Exhausted {
                label,
                attempts,
                last_error,
            } => HarnessError::RetryExhausted {
                operation: label,
                attempts,
                last_error: last_error.to_string(),
            },
            RetryError::Cancelled { label, .. } => HarnessError::Cancelled { operation: label },
        }
    }
}

/// Run `op` until it succeeds or the policy's attempt budget is spent.
///
/// Returns the first `Ok`. Sleeps `policy.delay` between attempts, never
/// after the last one. Attempts never overlap.
pub async fn retry<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: Option<&CancelToken>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            warn!(label, attempt, "Retry cancelled before attempt");
            return Err(RetryError::Cancelled {
                label: label.to_string(),
                attempts: attempt,
            });
        }

        attempt += 1;
        debug!(label, attempt, max_attempts, "Starting attempt");

        let err = match op().await {
            Ok(value) => {
                debug!(label, attempt, "Attempt succeeded");
                return Ok(value);
            }
            Err(err) => err,
        };

        if attempt >= max_attempts {
            error!(label, attempts = attempt, error = %err, "Retry budget exhausted");
            return Err(RetryError::Exhausted {
                label: label.to_string(),
                attempts: attempt,
                last_error: err,
            });
        }

        warn!(
            label,
            attempt,
            max_attempts,
            error = %err,
            delay_secs = policy.delay.as_secs_f64(),
            "Attempt failed, retrying"
        );

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = token.cancelled() => {
                        warn!(label, attempt, "Retry cancelled during delay");
                        return Err(RetryError::Cancelled {
                            label: label.to_string(),
                            attempts: attempt,
                        });
                    }
                }
            }
            None => tokio::time::sleep(policy.delay).await,
        }
    }
}
