//! Deployment driver: apply a template, read its outputs, destroy it

use crate::engine::ProvisioningEngine;
use crate::error::TerraformError;
use crate::outputs::OutputSet;
use crate::vars::VarSet;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Applies and destroys one template through a [`ProvisioningEngine`].
#[derive(Clone)]
pub struct DeploymentDriver {
    engine: Arc<dyn ProvisioningEngine>,
}

impl DeploymentDriver {
    pub fn new(engine: Arc<dyn ProvisioningEngine>) -> Self {
        Self { engine }
    }

    /// `init` + `apply` + read outputs.
    ///
    /// Any failure is reported as [`TerraformError::ApplyFailed`] and is
    /// never retried: a failed apply may have left partial state that only
    /// the engine's own destroy can unwind.
    pub async fn apply(&self, template_dir: &Path, vars: &VarSet) -> Result<OutputSet> {
        self.engine
            .init(template_dir)
            .await
            .map_err(|e| apply_failed("init", e))?;
        self.engine
            .apply(template_dir, vars)
            .await
            .map_err(|e| apply_failed("apply", e))?;
        let outputs = self
            .engine
            .outputs(template_dir)
            .await
            .map_err(|e| apply_failed("outputs", e))?;

        info!(outputs = outputs.len(), "Template applied");
        Ok(outputs)
    }

    /// Tear down everything the matching apply created.
    pub async fn destroy(&self, template_dir: &Path, vars: &VarSet) -> Result<()> {
        self.engine
            .destroy(template_dir, vars)
            .await
            .map_err(|e| TerraformError::DestroyFailed(Box::new(e)))?;
        info!(dir = ?template_dir, "Template destroyed");
        Ok(())
    }

    /// Bind a template and variable set into a deployment that can be
    /// applied and destroyed once.
    pub fn prepare(&self, template_dir: impl Into<PathBuf>, vars: VarSet) -> DeploymentHandle {
        DeploymentHandle {
            driver: self.clone(),
            template_dir: template_dir.into(),
            vars,
            destroyed: AtomicBool::new(false),
        }
    }
}

fn apply_failed(stage: &'static str, err: TerraformError) -> TerraformError {
    TerraformError::ApplyFailed {
        stage,
        source: Box::new(err),
    }
}

/// Ownership token for one applied (or attempted) set of resources.
pub struct DeploymentHandle {
    driver: DeploymentDriver,
    template_dir: PathBuf,
    vars: VarSet,
    destroyed: AtomicBool,
}

impl DeploymentHandle {
    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    pub async fn apply(&self) -> Result<OutputSet> {
        self.driver.apply(&self.template_dir, &self.vars).await
    }

    /// Destroy the deployment. A second call on the same handle is a no-op.
    pub async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            warn!(dir = ?self.template_dir, "Deployment already destroyed, skipping");
            return Ok(());
        }
        let result = self.driver.destroy(&self.template_dir, &self.vars).await;
        if result.is_err() {
            // allow an operator-triggered retry after a failed destroy
            self.destroyed.store(false, Ordering::SeqCst);
        }
        result
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for DeploymentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentHandle")
            .field("template_dir", &self.template_dir)
            .field("vars", &self.vars.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryEngine;

    fn vars() -> VarSet {
        VarSet::new().with("aws_region", "us-east-1").unwrap()
    }

    #[tokio::test]
    async fn test_apply_runs_init_apply_outputs() {
        let engine = Arc::new(MemoryEngine::with_outputs([("vpn_public_ip_address", "1.2.3.4")]));
        let driver = DeploymentDriver::new(engine.clone());

        let outputs = driver.apply(Path::new("."), &vars()).await.unwrap();
        assert_eq!(outputs.read_output("vpn_public_ip_address").unwrap(), "1.2.3.4");
        assert_eq!(engine.calls(), vec!["init", "apply", "outputs"]);
    }

    #[tokio::test]
    async fn test_apply_failure_is_apply_failed() {
        let engine = Arc::new(MemoryEngine::new().failing_apply("quota exceeded"));
        let driver = DeploymentDriver::new(engine.clone());

        let err = driver.apply(Path::new("."), &vars()).await.unwrap_err();
        assert!(matches!(err, TerraformError::ApplyFailed { stage: "apply", .. }));
        assert!(err.to_string().contains("quota exceeded"));
        // outputs are never read after a failed apply
        assert_eq!(engine.calls(), vec!["init", "apply"]);
    }

    #[tokio::test]
    async fn test_handle_destroy_is_idempotent() {
        let engine = Arc::new(MemoryEngine::new());
        let driver = DeploymentDriver::new(engine.clone());
        let handle = driver.prepare(".", vars());

        handle.apply().await.unwrap();
        handle.destroy().await.unwrap();
        handle.destroy().await.unwrap();

        assert!(handle.is_destroyed());
        assert_eq!(engine.destroy_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_destroy_can_be_retried() {
        let engine = Arc::new(MemoryEngine::new().failing_destroy("state locked"));
        let driver = DeploymentDriver::new(engine.clone());
        let handle = driver.prepare(".", vars());

        let err = handle.destroy().await.unwrap_err();
        assert!(matches!(err, TerraformError::DestroyFailed(_)));
        assert!(!handle.is_destroyed());
    }
}
