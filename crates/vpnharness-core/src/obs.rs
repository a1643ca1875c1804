//! Structured observability hooks for harness run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`RunSpan`]
//! - Emission functions for run, resource, teardown and check events
//!
//! Events are emitted at `info!` (failures at `warn!`) with a stable `event`
//! field so JSON log lines can be filtered by kind.

use tracing::{info, warn, Span};

use crate::error::ResourceKind;

/// Run-scoped span, tagged with the run id.
///
/// Async code attaches it with `tracing::Instrument`; synchronous code can
/// hold the guard returned by [`RunSpan::enter`].
pub struct RunSpan {
    span: Span,
}

impl RunSpan {
    pub fn new(run_id: &str) -> Self {
        Self {
            span: tracing::info_span!("vpnharness.run", run_id = %run_id),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Enter the span until the guard is dropped. Not `Send`; do not hold
    /// across an `.await`.
    pub fn enter(run_id: &str) -> tracing::span::EnteredSpan {
        Self::new(run_id).span.entered()
    }
}

/// Emit event: run started.
///
/// ```ignore
/// emit_run_started("k3x9a0", "us-east-1");
/// // logs: event=run.started run_id=k3x9a0 region=us-east-1
/// ```
pub fn emit_run_started(run_id: &str, region: &str) {
    info!(event = "run.started", run_id = %run_id, region = %region);
}

/// Emit event: run finished with duration and outcome.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, passed: bool, error_class: Option<&str>) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed = passed,
        error_class = error_class.unwrap_or("none"),
    );
}

pub fn emit_resource_acquired(kind: ResourceKind, label: &str) {
    info!(event = "resource.acquired", kind = %kind, label = %label);
}

/// Emit event: a release was scheduled ahead of an acquisition that may
/// fail halfway.
pub fn emit_release_scheduled(kind: ResourceKind, label: &str) {
    info!(event = "release.scheduled", kind = %kind, label = %label);
}

pub fn emit_resource_released(kind: ResourceKind, label: &str) {
    info!(event = "resource.released", kind = %kind, label = %label);
}

/// Emit event: a release action failed (warning level, never fatal).
pub fn emit_teardown_failed(kind: ResourceKind, label: &str, error: &dyn std::fmt::Display) {
    warn!(event = "teardown.failed", kind = %kind, label = %label, error = %error);
}

pub fn emit_check_finished(step: &str, passed: bool, duration_ms: u64) {
    info!(
        event = "check.finished",
        step = %step,
        passed = passed,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _guard = RunSpan::enter("abc");
        emit_run_started("abc", "us-east-1");
        emit_resource_acquired(ResourceKind::KeyPair, "pritunl-test-key-abc");
    }

    #[test]
    fn test_span_clone_carries_name() {
        let span = RunSpan::new("abc").span();
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "vpnharness.run");
        }
    }
}
