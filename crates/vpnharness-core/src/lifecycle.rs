//! Release stack for everything a run acquires.
//!
//! Each acquisition schedules its release in the same call, and
//! [`Lifecycle::release_all`] unwinds the stack in reverse order. A failing
//! (or panicking) release becomes a [`TeardownWarning`] and unwinding goes on.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{ResourceKind, TeardownWarning};
use crate::obs;

type ReleaseFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type ReleaseAction = Box<dyn FnOnce() -> ReleaseFuture + Send>;

struct Entry {
    kind: ResourceKind,
    label: String,
    action: ReleaseAction,
}

/// A resource whose release action completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedResource {
    pub kind: ResourceKind,
    pub label: String,
}

/// Outcome of unwinding the release stack, in release order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownSummary {
    pub released: Vec<ReleasedResource>,
    pub warnings: Vec<TeardownWarning>,
}

impl TeardownSummary {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// LIFO stack of release actions owned by one run.
#[derive(Default)]
pub struct Lifecycle {
    stack: Vec<Entry>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await `acquire`; on success schedule `release(handle)` and return the
    /// handle. A failed acquisition schedules nothing.
    pub async fn acquire<T, E, Fut, R, RFut>(
        &mut self,
        kind: ResourceKind,
        label: impl Into<String>,
        acquire: Fut,
        release: R,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: Clone + Send + 'static,
        R: FnOnce(T) -> RFut + Send + 'static,
        RFut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        let handle = acquire.await?;

        obs::emit_resource_acquired(kind, &label);
        let owned = handle.clone();
        self.push(kind, label, Box::new(move || Box::pin(release(owned))));
        Ok(handle)
    }

    /// Schedule `release` first, then await `acquire`.
    ///
    /// For acquisitions that can fail halfway and leave partial state behind:
    /// the release runs during unwinding whether `acquire` succeeded or not.
    pub async fn acquire_guarded<T, E, Fut, R, RFut>(
        &mut self,
        kind: ResourceKind,
        label: impl Into<String>,
        release: R,
        acquire: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce() -> RFut + Send + 'static,
        RFut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        obs::emit_release_scheduled(kind, &label);
        self.push(kind, label.clone(), Box::new(move || Box::pin(release())));

        let handle = acquire.await?;
        obs::emit_resource_acquired(kind, &label);
        Ok(handle)
    }

    fn push(&mut self, kind: ResourceKind, label: String, action: ReleaseAction) {
        self.stack.push(Entry {
            kind,
            label,
            action,
        });
    }

    /// Labels still scheduled for release, oldest first.
    pub fn pending(&self) -> Vec<String> {
        self.stack.iter().map(|e| e.label.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Run every scheduled release, most recent first.
    ///
    /// Never fails: release errors are collected as warnings. A second call
    /// finds an empty stack and returns an empty summary.
    pub async fn release_all(&mut self) -> TeardownSummary {
        let mut summary = TeardownSummary::default();

        while let Some(entry) = self.stack.pop() {
            debug!(kind = %entry.kind, label = %entry.label, "Releasing");
            let outcome = AssertUnwindSafe((entry.action)()).catch_unwind().await;

            let message = match outcome {
                Ok(Ok(())) => {
                    obs::emit_resource_released(entry.kind, &entry.label);
                    summary.released.push(ReleasedResource {
                        kind: entry.kind,
                        label: entry.label,
                    });
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => format!("release panicked: {}", panic_message(panic.as_ref())),
            };

            obs::emit_teardown_failed(entry.kind, &entry.label, &message);
            summary.warnings.push(TeardownWarning {
                kind: entry.kind,
                label: entry.label,
                message,
            });
        }

        summary
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if !self.stack.is_empty() {
            error!(
                pending = ?self.pending(),
                "Lifecycle dropped with unreleased resources"
            );
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
