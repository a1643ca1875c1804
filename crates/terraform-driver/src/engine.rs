//! Provisioning engine abstraction and the Terraform CLI implementation

use crate::error::TerraformError;
use crate::outputs::OutputSet;
use crate::vars::VarSet;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Operations the harness consumes from a provisioning engine.
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Prepare the template directory (providers, modules, backend).
    async fn init(&self, template_dir: &Path) -> Result<()>;

    /// Converge real infrastructure toward the template.
    async fn apply(&self, template_dir: &Path, vars: &VarSet) -> Result<()>;

    /// Tear down everything the template manages.
    async fn destroy(&self, template_dir: &Path, vars: &VarSet) -> Result<()>;

    /// Read one published output.
    async fn output(&self, template_dir: &Path, name: &str) -> Result<String>;

    /// Read every published output.
    async fn outputs(&self, template_dir: &Path) -> Result<OutputSet>;
}

/// Drives the `terraform` (or a compatible, e.g. `tofu`) binary.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Arguments for `apply`/`destroy`.
    fn converge_args(subcommand: &str, vars: &VarSet) -> Vec<String> {
        let mut args = vec![
            subcommand.to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-auto-approve".to_string(),
        ];
        args.extend(vars.to_cli_args());
        args
    }

    async fn run(&self, template_dir: &Path, args: &[String]) -> Result<Vec<u8>> {
        let shown = format!("{} {}", self.binary, args.first().map(String::as_str).unwrap_or(""));
        debug!(command = %shown, dir = ?template_dir, "Running provisioning engine");

        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(template_dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TerraformError::NotInstalled(self.binary.clone()),
                _ => TerraformError::Io(e),
            })?;

        if !output.status.success() {
            return Err(TerraformError::CommandFailed {
                command: shown,
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ProvisioningEngine for TerraformCli {
    async fn init(&self, template_dir: &Path) -> Result<()> {
        info!(dir = ?template_dir, "{} init", self.binary);
        let args = ["init", "-input=false", "-no-color"].map(String::from);
        self.run(template_dir, &args).await.map(|_| ())
    }

    async fn apply(&self, template_dir: &Path, vars: &VarSet) -> Result<()> {
        info!(dir = ?template_dir, vars = vars.len(), "{} apply", self.binary);
        self.run(template_dir, &Self::converge_args("apply", vars))
            .await
            .map(|_| ())
    }

    async fn destroy(&self, template_dir: &Path, vars: &VarSet) -> Result<()> {
        info!(dir = ?template_dir, "{} destroy", self.binary);
        self.run(template_dir, &Self::converge_args("destroy", vars))
            .await
            .map(|_| ())
    }

    async fn output(&self, template_dir: &Path, name: &str) -> Result<String> {
        self.outputs(template_dir)
            .await?
            .read_output(name)
            .map(str::to_string)
    }

    async fn outputs(&self, template_dir: &Path) -> Result<OutputSet> {
        let args = ["output", "-no-color", "-json"].map(String::from);
        let stdout = self.run(template_dir, &args).await?;
        OutputSet::from_json(&stdout)
    }
}

/// Check whether the engine binary can be executed.
pub async fn is_engine_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
