//! Terraform-Driver: provisioning engine integration for VPN Harness
//!
//! This crate wraps the external provisioning engine (Terraform or a
//! compatible binary such as OpenTofu). It renders typed variables into
//! `-var` arguments, runs `init`/`apply`/`destroy`, and reads the template's
//! published outputs.
//!
//! ## Key Components
//!
//! - `ProvisioningEngine`: the engine contract (`TerraformCli` implements it)
//! - `DeploymentDriver`: apply-then-read-outputs, destroy
//! - `DeploymentHandle`: one deployment, destroyable exactly once
//! - `VarSet` / `OutputSet`: typed inputs and outputs

pub mod driver;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod outputs;
pub mod vars;

pub use driver::{DeploymentDriver, DeploymentHandle};
pub use engine::{is_engine_available, ProvisioningEngine, TerraformCli};
pub use error::TerraformError;
pub use outputs::OutputSet;
pub use vars::{VarSet, VarValue};

/// Result type for terraform-driver operations
pub type Result<T> = std::result::Result<T, TerraformError>;
