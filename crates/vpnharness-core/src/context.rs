//! Per-run context: identity, typed template variables, retry policy.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use terraform_driver::VarSet;

use crate::config::{validate_bucket_name, RunConfig};
use crate::error::{HarnessError, Result};
use crate::identity::RunId;
use crate::retry::RetryPolicy;

/// Variables the appliance template declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVars {
    pub aws_region: String,
    pub aws_key_name: String,
    pub vpc_id: String,
    pub ami_id: String,
    pub public_subnet_id: String,
    pub whitelist: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub s3_bucket_name: String,
}

impl TemplateVars {
    /// Render into the engine's variable set.
    pub fn to_var_set(&self) -> Result<VarSet> {
        let set = VarSet::new()
            .with("aws_region", self.aws_region.as_str())?
            .with("aws_key_name", self.aws_key_name.as_str())?
            .with("vpc_id", self.vpc_id.as_str())?
            .with("ami_id", self.ami_id.as_str())?
            .with("public_subnet_id", self.public_subnet_id.as_str())?
            .with("whitelist", self.whitelist.clone())?
            .with("tags", self.tags.clone())?
            .with("s3_bucket_name", self.s3_bucket_name.as_str())?;
        Ok(set)
    }
}

/// Everything one run needs. Built once, never shared across runs.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub region: String,
    pub vars: TemplateVars,
    pub retry: RetryPolicy,
    pub template_dir: PathBuf,
    pub ssh_user: String,
}

impl RunContext {
    /// Validate `config` and derive every per-run name from `run_id`.
    pub fn from_config(config: &RunConfig, run_id: RunId) -> Result<Self> {
        config.validate()?;

        let mut tags = config.tags.clone();
        tags.insert("Name".to_string(), run_id.namespaced("pritunl-instance"));

        let s3_bucket_name = run_id.namespaced(&config.bucket_prefix);
        validate_bucket_name(&s3_bucket_name).map_err(HarnessError::InvalidConfig)?;

        let vars = TemplateVars {
            aws_region: config.region.clone(),
            aws_key_name: run_id.namespaced(&config.key_name_prefix),
            vpc_id: config.vpc_id.clone(),
            ami_id: config.ami_id.clone(),
            public_subnet_id: config.public_subnet_id.clone(),
            whitelist: config.whitelist.clone(),
            tags,
            s3_bucket_name,
        };

        Ok(Self {
            run_id,
            region: config.region.clone(),
            vars,
            retry: config.retry_policy(),
            template_dir: config.template_dir.clone(),
            ssh_user: config.ssh_user.clone(),
        })
    }

    /// Use the configured run id, or generate a fresh one.
    pub fn new(config: &RunConfig) -> Result<Self> {
        let run_id = match &config.run_id {
            Some(id) => RunId::parse(id)?,
            None => RunId::generate(),
        };
        Self::from_config(config, run_id)
    }

    pub fn key_name(&self) -> &str {
        &self.vars.aws_key_name
    }

    pub fn bucket_name(&self) -> &str {
        &self.vars.s3_bucket_name
    }

    pub fn var_set(&self) -> Result<VarSet> {
        self.vars.to_var_set()
    }

    /// SHA-256 over the rendered `-var` arguments, for correlating reports.
    pub fn vars_digest(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for arg in self.var_set()?.to_cli_args() {
            hasher.update(arg.as_bytes());
            hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
