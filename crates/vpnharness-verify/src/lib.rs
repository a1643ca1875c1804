//! VPN Harness verify - checks and run orchestration
//!
//! Provides:
//! - Reachability gates for the management UI and SSH
//! - A catalogue of appliance checks resolved into an ordered plan
//! - A fail-fast verification pipeline
//! - The `Harness`, which provisions, verifies and always tears down

pub mod gate;
pub mod harness;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stage;

// Re-export key types
pub use gate::{await_http, await_ssh};
pub use harness::Harness;
pub use pipeline::{PipelineResult, VerificationPipeline};
pub use report::{RunOutcome, RunReport};
pub use runner::{CheckResult, CheckRunner, CheckTarget};
pub use stage::{BuiltinCheck, CheckKind, CheckPlan, CheckStep, HttpExpectation, PlanEntry};
