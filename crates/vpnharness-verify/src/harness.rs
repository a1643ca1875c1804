//! Run orchestration: provision, gate, verify, always tear down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use terraform_driver::{DeploymentDriver, ProvisioningEngine};
use tracing::{info, warn, Instrument};
use vpnharness_core::lifecycle::panic_message;
use vpnharness_core::obs::{self, RunSpan};
use vpnharness_core::{
    CancelToken, CloudApi, HarnessError, HttpProbe, KeyPair, Lifecycle, RemoteShell,
    ResourceKind, Result, RunContext, SshTarget,
};

use crate::gate;
use crate::pipeline::VerificationPipeline;
use crate::report::{RunOutcome, RunReport};
use crate::runner::{CheckResult, CheckTarget};
use crate::stage::{CheckPlan, OUTPUT_MANAGEMENT_UI, OUTPUT_PUBLIC_IP};

/// Composes the collaborators into complete acceptance runs.
#[derive(Clone)]
pub struct Harness {
    driver: DeploymentDriver,
    cloud: Arc<dyn CloudApi>,
    shell: Arc<dyn RemoteShell>,
    http: Arc<dyn HttpProbe>,
    cancel: CancelToken,
}

impl Harness {
    pub fn new(
        engine: Arc<dyn ProvisioningEngine>,
        cloud: Arc<dyn CloudApi>,
        shell: Arc<dyn RemoteShell>,
        http: Arc<dyn HttpProbe>,
    ) -> Self {
        Self {
            driver: DeploymentDriver::new(engine),
            cloud,
            shell,
            http,
            cancel: CancelToken::new(),
        }
    }

    /// Share an externally owned token (e.g. one tripped by Ctrl-C).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute one run. Never fails: every outcome, including a panic in
    /// the forward phase, ends up in the report, and every acquired resource
    /// is released before this returns.
    pub async fn run(&self, ctx: &RunContext, plan: &CheckPlan) -> RunReport {
        let span = RunSpan::new(ctx.run_id.as_str()).span();
        self.run_inner(ctx, plan).instrument(span).await
    }

    async fn run_inner(&self, ctx: &RunContext, plan: &CheckPlan) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        obs::emit_run_started(ctx.run_id.as_str(), &ctx.region);

        let vars_digest = ctx.vars_digest().unwrap_or_else(|e| {
            warn!(error = %e, "Could not digest template variables");
            String::new()
        });

        let mut lifecycle = Lifecycle::new();
        let mut checks = Vec::new();
        let forward = AssertUnwindSafe(self.forward(ctx, plan, &mut lifecycle, &mut checks))
            .catch_unwind()
            .await;

        let error = match forward {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(HarnessError::Internal(format!(
                "run panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let teardown = lifecycle.release_all().await;

        let outcome = match &error {
            None => RunOutcome::Passed,
            Some(e) => {
                warn!(class = e.class(), error = %e, "Run failed");
                RunOutcome::from_error(e)
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_run_finished(
            ctx.run_id.as_str(),
            duration_ms,
            error.is_none(),
            error.as_ref().map(HarnessError::class),
        );

        RunReport {
            run_id: ctx.run_id.to_string(),
            started_at,
            duration_ms,
            vars_digest,
            outcome,
            checks,
            released: teardown.released,
            teardown_warnings: teardown.warnings,
        }
    }

    /// Acquire, gate and verify. Every acquisition goes through `lifecycle`
    /// so the caller can unwind it whatever happens here.
    async fn forward(
        &self,
        ctx: &RunContext,
        plan: &CheckPlan,
        lifecycle: &mut Lifecycle,
        checks: &mut Vec<CheckResult>,
    ) -> Result<()> {
        self.ensure_not_cancelled("provisioning")?;

        let cloud = self.cloud.clone();
        let key: KeyPair = lifecycle
            .acquire(
                ResourceKind::KeyPair,
                ctx.key_name(),
                async {
                    self.cloud
                        .create_key_pair(&ctx.region, ctx.key_name())
                        .await
                        .map_err(|e| HarnessError::AcquireFailed {
                            kind: ResourceKind::KeyPair,
                            message: e.to_string(),
                        })
                },
                move |key: KeyPair| async move {
                    cloud.delete_key_pair(&key).await.map_err(anyhow::Error::from)
                },
            )
            .await?;

        // destroy is scheduled before apply: a failed apply can leave
        // partial infrastructure behind
        let deployment = Arc::new(self.driver.prepare(&ctx.template_dir, ctx.var_set()?));
        let releaser = deployment.clone();
        let outputs = lifecycle
            .acquire_guarded(
                ResourceKind::Deployment,
                ctx.run_id.namespaced("pritunl-instance"),
                move || async move { releaser.destroy().await.map_err(anyhow::Error::from) },
                deployment.apply(),
            )
            .await?;

        let public_ip = outputs.read_output(OUTPUT_PUBLIC_IP)?.to_string();
        let steps = plan.resolve(ctx, &outputs)?;
        info!(public_ip = %public_ip, checks = steps.len(), "Deployment applied");

        if plan.http_gate {
            let url = outputs.read_output(OUTPUT_MANAGEMENT_UI)?;
            gate::await_http(
                self.http.as_ref(),
                url,
                &plan.management_ui,
                &ctx.retry,
                Some(&self.cancel),
            )
            .await?;
        }

        let target = SshTarget::new(public_ip, &ctx.ssh_user, &key.private_key_path);
        let session =
            gate::await_ssh(self.shell.as_ref(), &target, &ctx.retry, Some(&self.cancel)).await?;

        self.ensure_not_cancelled("verification")?;
        let check_target = CheckTarget {
            shell: self.shell.as_ref(),
            session: &session,
            http: self.http.as_ref(),
            cloud: self.cloud.as_ref(),
            region: &ctx.region,
        };
        let result = VerificationPipeline::run(&steps, &check_target).await;
        let failure = result.to_error();
        checks.extend(result.results);

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn ensure_not_cancelled(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(HarnessError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// One task per run; runs share no mutable state. Reports come back in
    /// the order of `contexts`.
    pub async fn run_many(&self, contexts: Vec<RunContext>, plan: &CheckPlan) -> Vec<RunReport> {
        let mut handles = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            let harness = self.clone();
            let plan = plan.clone();
            let run_id = ctx.run_id.to_string();
            let handle = tokio::spawn(async move { harness.run(&ctx, &plan).await });
            handles.push((run_id, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (run_id, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    let err = HarnessError::Internal(format!("run task failed: {}", e));
                    RunReport {
                        run_id,
                        started_at: Utc::now(),
                        duration_ms: 0,
                        vars_digest: String::new(),
                        outcome: RunOutcome::from_error(&err),
                        checks: Vec::new(),
                        released: Vec::new(),
                        teardown_warnings: Vec::new(),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}
