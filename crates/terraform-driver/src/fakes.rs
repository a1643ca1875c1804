//! In-memory provisioning engine (testing only)
//!
//! `MemoryEngine` satisfies the [`ProvisioningEngine`] contract without
//! touching any cloud: it records every call, serves configured outputs and
//! can be told to fail apply or destroy.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::ProvisioningEngine;
use crate::error::TerraformError;
use crate::outputs::OutputSet;
use crate::vars::VarSet;
use crate::Result;

#[derive(Debug, Default)]
struct EngineState {
    calls: Vec<String>,
    applied_vars: Option<VarSet>,
    deployed: bool,
    destroy_count: usize,
}

/// In-memory engine that tracks whether the template is "deployed".
#[derive(Debug, Default)]
pub struct MemoryEngine {
    outputs: OutputSet,
    apply_error: Option<String>,
    destroy_error: Option<String>,
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outputs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            outputs: OutputSet::from_pairs(pairs),
            ..Self::default()
        }
    }

    /// Make `apply` fail with the given stderr. Partial state is still
    /// recorded as deployed, like a real half-finished apply.
    pub fn failing_apply(mut self, stderr: &str) -> Self {
        self.apply_error = Some(stderr.to_string());
        self
    }

    pub fn failing_destroy(mut self, stderr: &str) -> Self {
        self.destroy_error = Some(stderr.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn is_deployed(&self) -> bool {
        self.state.lock().unwrap().deployed
    }

    pub fn destroy_count(&self) -> usize {
        self.state.lock().unwrap().destroy_count
    }

    pub fn applied_vars(&self) -> Option<VarSet> {
        self.state.lock().unwrap().applied_vars.clone()
    }

    fn record(&self, call: &str) {
        self.state.lock().unwrap().calls.push(call.to_string());
    }
}

fn failure(command: &str, stderr: &str) -> TerraformError {
    TerraformError::CommandFailed {
        command: command.to_string(),
        exit_code: 1,
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ProvisioningEngine for MemoryEngine {
    async fn init(&self, _template_dir: &Path) -> Result<()> {
        self.record("init");
        Ok(())
    }

    async fn apply(&self, _template_dir: &Path, vars: &VarSet) -> Result<()> {
        self.record("apply");
        let mut state = self.state.lock().unwrap();
        state.applied_vars = Some(vars.clone());
        state.deployed = true;
        match &self.apply_error {
            Some(stderr) => Err(failure("terraform apply", stderr)),
            None => Ok(()),
        }
    }

    async fn destroy(&self, _template_dir: &Path, _vars: &VarSet) -> Result<()> {
        self.record("destroy");
        if let Some(stderr) = &self.destroy_error {
            return Err(failure("terraform destroy", stderr));
        }
        let mut state = self.state.lock().unwrap();
        state.deployed = false;
        state.destroy_count += 1;
        Ok(())
    }

    async fn output(&self, _template_dir: &Path, name: &str) -> Result<String> {
        self.record("output");
        self.outputs.read_output(name).map(str::to_string)
    }

    async fn outputs(&self, _template_dir: &Path) -> Result<OutputSet> {
        self.record("outputs");
        Ok(self.outputs.clone())
    }
}
