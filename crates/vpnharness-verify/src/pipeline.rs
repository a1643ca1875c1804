//! Fail-fast verification pipeline.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vpnharness_core::obs;
use vpnharness_core::HarnessError;

use crate::runner::{CheckResult, CheckRunner, CheckTarget};
use crate::stage::CheckStep;

/// Outcome of running a list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Whether every step passed.
    pub success: bool,

    /// Results in execution order, up to and including the first failure.
    pub results: Vec<CheckResult>,

    /// Name of the step that failed, if any.
    pub failed_step: Option<String>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// `VerificationFailed` for the failing step, if there was one.
    pub fn to_error(&self) -> Option<HarnessError> {
        self.results
            .iter()
            .find(|r| !r.passed)
            .map(|r| HarnessError::VerificationFailed {
                step: r.step.clone(),
                diagnostic: r.diagnostic.clone().unwrap_or_default(),
            })
    }
}

pub struct VerificationPipeline;

impl VerificationPipeline {
    /// Execute `steps` strictly in order; the first failing step ends the
    /// pipeline and no later step runs.
    pub async fn run(steps: &[CheckStep], target: &CheckTarget<'_>) -> PipelineResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(steps.len());
        let mut failed_step = None;

        for step in steps {
            info!(step = %step.name, "Executing check");
            let result = CheckRunner::execute(step, target).await;
            obs::emit_check_finished(&result.step, result.passed, result.duration_ms);

            let passed = result.passed;
            if !passed {
                warn!(
                    step = %step.name,
                    diagnostic = result.diagnostic.as_deref().unwrap_or(""),
                    "Check failed, stopping pipeline"
                );
                failed_step = Some(step.name.clone());
            }
            results.push(result);
            if !passed {
                break;
            }
        }

        PipelineResult {
            success: failed_step.is_none(),
            results,
            failed_step,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
