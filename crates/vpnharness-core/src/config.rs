//! Run configuration
//!
//! Loaded in layers, later layers winning:
//! 1. Built-in defaults
//! 2. A TOML file (`--config`)
//! 3. Environment variables (`VPNHARNESS_*`)
//! 4. CLI flags (applied by the binary)

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HarnessError, Result};
use crate::retry::RetryPolicy;

/// Longest id [`crate::RunId::parse`] accepts; used to bound derived names.
const MAX_RUN_ID_LEN: usize = 16;

/// Every recognized run parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Cloud region for every resource of the run
    #[serde(default = "default_region")]
    pub region: String,
    /// Key pair name is `{key_name_prefix}-{run_id}`
    #[serde(default = "default_key_name_prefix")]
    pub key_name_prefix: String,
    /// Network to deploy into (`vpc-...`)
    #[serde(default)]
    pub vpc_id: String,
    /// Public subnet for the instance (`subnet-...`)
    #[serde(default)]
    pub public_subnet_id: String,
    /// Machine image (`ami-...`)
    #[serde(default)]
    pub ami_id: String,
    /// CIDRs allowed to reach the appliance
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,
    /// Tags applied to every resource; `Name` is added per run
    #[serde(default = "default_tags")]
    pub tags: BTreeMap<String, String>,
    /// Backup bucket name is `{bucket_prefix}-{run_id}`
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,
    /// Directory holding the declarative template
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    /// Provisioning engine binary (`terraform`, `tofu`, ...)
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,
    /// Login user on the appliance image
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    /// Where generated private keys are written
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,
    /// Reachability retry budget
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Accept the appliance's self-signed management certificate
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Wait for the management UI before the SSH gate
    #[serde(default)]
    pub http_gate: bool,
    #[serde(default = "default_management_ui_status")]
    pub management_ui_status: u16,
    /// Substring the management UI body must contain
    #[serde(default)]
    pub management_ui_body: String,
    /// Fixed run id, for reproducing a run; generated when absent
    #[serde(default)]
    pub run_id: Option<String>,
    /// Check names to run, in order; the default plan when absent
    #[serde(default)]
    pub checks: Option<Vec<String>>,
}

fn default_region() -> String {
    "us-east-1".into()
}
fn default_key_name_prefix() -> String {
    "pritunl-test-key".into()
}
fn default_whitelist() -> Vec<String> {
    vec!["0.0.0.0/0".into()]
}
fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("env".to_string(), "test".to_string()),
        ("service".to_string(), "pritunl".to_string()),
    ])
}
fn default_bucket_prefix() -> String {
    "pritunl-backups".into()
}
fn default_template_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_terraform_bin() -> String {
    "terraform".into()
}
fn default_ssh_user() -> String {
    "ec2-user".into()
}
fn default_key_dir() -> PathBuf {
    std::env::temp_dir().join("vpnharness-keys")
}
fn default_max_attempts() -> u32 {
    30
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_management_ui_status() -> u16 {
    200
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            key_name_prefix: default_key_name_prefix(),
            vpc_id: String::new(),
            public_subnet_id: String::new(),
            ami_id: String::new(),
            whitelist: default_whitelist(),
            tags: default_tags(),
            bucket_prefix: default_bucket_prefix(),
            template_dir: default_template_dir(),
            terraform_bin: default_terraform_bin(),
            ssh_user: default_ssh_user(),
            key_dir: default_key_dir(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            accept_invalid_certs: true,
            http_gate: false,
            management_ui_status: default_management_ui_status(),
            management_ui_body: String::new(),
            run_id: None,
            checks: None,
        }
    }
}

impl RunConfig {
    /// Defaults, then the TOML file if given, then `VPNHARNESS_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::InvalidConfig(format!("reading {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| HarnessError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        info!(?path, "Loaded config from file");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HarnessError::InvalidConfig(e.to_string()))
    }

    /// Override fields from environment-style lookups (`VPNHARNESS_*`).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VPNHARNESS_REGION") {
            self.region = v;
        }
        if let Some(v) = lookup("VPNHARNESS_VPC_ID") {
            self.vpc_id = v;
        }
        if let Some(v) = lookup("VPNHARNESS_PUBLIC_SUBNET_ID") {
            self.public_subnet_id = v;
        }
        if let Some(v) = lookup("VPNHARNESS_AMI_ID") {
            self.ami_id = v;
        }
        if let Some(v) = lookup("VPNHARNESS_WHITELIST") {
            self.whitelist = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("VPNHARNESS_BUCKET_PREFIX") {
            self.bucket_prefix = v;
        }
        if let Some(v) = lookup("VPNHARNESS_TEMPLATE_DIR") {
            self.template_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VPNHARNESS_TERRAFORM_BIN") {
            self.terraform_bin = v;
        }
        if let Some(v) = lookup("VPNHARNESS_SSH_USER") {
            self.ssh_user = v;
        }
        if let Some(v) = lookup("VPNHARNESS_MAX_ATTEMPTS") {
            self.max_attempts = parse_env("VPNHARNESS_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("VPNHARNESS_RETRY_DELAY_SECS") {
            self.retry_delay_secs = parse_env("VPNHARNESS_RETRY_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("VPNHARNESS_RUN_ID") {
            self.run_id = Some(v);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.retry_delay_secs))
    }

    /// Reject anything that would fail only after resources exist.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_region(&self.region) {
            return invalid(format!("region '{}' is not a region name", self.region));
        }
        require_prefixed("vpc_id", &self.vpc_id, "vpc-")?;
        require_prefixed("public_subnet_id", &self.public_subnet_id, "subnet-")?;
        require_prefixed("ami_id", &self.ami_id, "ami-")?;

        if self.whitelist.is_empty() {
            return invalid("whitelist must contain at least one CIDR".to_string());
        }
        for cidr in &self.whitelist {
            if !is_valid_cidr(cidr) {
                return invalid(format!("whitelist entry '{}' is not a CIDR block", cidr));
            }
        }

        if self.tags.keys().any(|k| k.trim().is_empty()) {
            return invalid("tag keys must not be empty".to_string());
        }
        if self.key_name_prefix.trim().is_empty() {
            return invalid("key_name_prefix must not be empty".to_string());
        }

        // longest name this prefix can produce must still be a legal bucket
        let longest = format!("{}-{}", self.bucket_prefix, "a".repeat(MAX_RUN_ID_LEN));
        validate_bucket_name(&longest).map_err(|e| {
            HarnessError::InvalidConfig(format!("bucket_prefix '{}': {}", self.bucket_prefix, e))
        })?;

        if self.ssh_user.trim().is_empty() {
            return invalid("ssh_user must not be empty".to_string());
        }
        if self.terraform_bin.trim().is_empty() {
            return invalid("terraform_bin must not be empty".to_string());
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1".to_string());
        }
        if !(100..=599).contains(&self.management_ui_status) {
            return invalid(format!(
                "management_ui_status {} is not an HTTP status",
                self.management_ui_status
            ));
        }
        if let Some(id) = &self.run_id {
            crate::identity::RunId::parse(id)?;
        }
        Ok(())
    }
}

fn invalid(message: String) -> Result<()> {
    Err(HarnessError::InvalidConfig(message))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HarnessError::InvalidConfig(format!("{}='{}' is not a number", key, value)))
}

fn require_prefixed(field: &str, value: &str, prefix: &str) -> Result<()> {
    let rest = value.strip_prefix(prefix).unwrap_or("");
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphanumeric()) {
        return invalid(format!(
            "{} is required and must look like '{}...' (got '{}')",
            field, prefix, value
        ));
    }
    Ok(())
}

fn is_valid_region(region: &str) -> bool {
    let pattern = regex::Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$");
    matches!(pattern, Ok(re) if re.is_match(region))
}

/// IPv4 or IPv6 network in `addr/prefix` form.
pub fn is_valid_cidr(cidr: &str) -> bool {
    let Some((addr, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };
    match addr {
        IpAddr::V4(_) => prefix <= 32,
        IpAddr::V6(_) => prefix <= 128,
    }
}

/// S3 general-purpose bucket naming rules.
pub fn validate_bucket_name(name: &str) -> std::result::Result<(), String> {
    if !(3..=63).contains(&name.len()) {
        return Err(format!("'{}' must be 3-63 characters long", name));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(format!(
            "'{}' may only contain lowercase letters, digits, hyphens and dots",
            name
        ));
    }
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !name.starts_with(alnum) || !name.ends_with(alnum) {
        return Err(format!("'{}' must start and end with a letter or digit", name));
    }
    if name.contains("..") {
        return Err(format!("'{}' must not contain consecutive dots", name));
    }
    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return Err(format!("'{}' must not be formatted as an IP address", name));
    }
    Ok(())
}
