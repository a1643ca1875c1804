//! Run-level error taxonomy for VPN Harness.

use serde::{Deserialize, Serialize};

/// Kind of resource held on the release stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    KeyPair,
    Deployment,
    Other,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::KeyPair => write!(f, "key_pair"),
            ResourceKind::Deployment => write!(f, "deployment"),
            ResourceKind::Other => write!(f, "other"),
        }
    }
}

/// Fatal run errors. Each one stops forward progress but never the release stack.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("apply failed: {0}")]
    ApplyFailed(String),

    #[error("output missing: {name}")]
    OutputMissing { name: String },

    #[error("{operation} did not succeed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("verification failed at step '{step}': {diagnostic}")]
    VerificationFailed { step: String, diagnostic: String },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("could not acquire {kind}: {message}")]
    AcquireFailed { kind: ResourceKind, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal fault: {0}")]
    Internal(String),
}

impl HarnessError {
    /// Stable class name used in reports and logs.
    pub fn class(&self) -> &'static str {
        match self {
            HarnessError::ApplyFailed(_) => "ApplyFailed",
            HarnessError::OutputMissing { .. } => "OutputMissing",
            HarnessError::RetryExhausted { .. } => "RetryExhausted",
            HarnessError::VerificationFailed { .. } => "VerificationFailed",
            HarnessError::Cancelled { .. } => "Cancelled",
            HarnessError::AcquireFailed { .. } => "AcquireFailed",
            HarnessError::InvalidConfig(_) => "InvalidConfig",
            HarnessError::Internal(_) => "Internal",
        }
    }
}

impl From<terraform_driver::TerraformError> for HarnessError {
    fn from(err: terraform_driver::TerraformError) -> Self {
        match err {
            terraform_driver::TerraformError::OutputMissing(name) => {
                HarnessError::OutputMissing { name }
            }
            terraform_driver::TerraformError::InvalidVariable(name) => {
                HarnessError::InvalidConfig(format!("invalid template variable name '{}'", name))
            }
            other => HarnessError::ApplyFailed(other.to_string()),
        }
    }
}

/// A release action that failed. Logged and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownWarning {
    pub kind: ResourceKind,
    pub label: String,
    pub message: String,
}

impl std::fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to release {} '{}': {}", self.kind, self.label, self.message)
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use terraform_driver::TerraformError;

    #[test]
    fn test_retry_exhausted_display() {
        let err = HarnessError::RetryExhausted {
            operation: "ssh 54.1.2.3".to_string(),
            attempts: 30,
            last_error: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("30 attempt(s)"));
        assert!(msg.contains("connection refused"));
        assert_eq!(err.class(), "RetryExhausted");
    }

    #[test]
    fn test_terraform_output_missing_maps_to_output_missing() {
        let err: HarnessError = TerraformError::OutputMissing("s3_bucket_name".to_string()).into();
        assert!(matches!(err, HarnessError::OutputMissing { ref name } if name == "s3_bucket_name"));
    }

    #[test]
    fn test_terraform_failure_maps_to_apply_failed() {
        let err: HarnessError = TerraformError::NotInstalled("terraform".to_string()).into();
        assert_eq!(err.class(), "ApplyFailed");
    }

    #[test]
    fn test_teardown_warning_display() {
        let warning = TeardownWarning {
            kind: ResourceKind::KeyPair,
            label: "pritunl-test-key-abc".to_string(),
            message: "throttled".to_string(),
        };
        assert_eq!(
            warning.to_string(),
            "failed to release key_pair 'pritunl-test-key-abc': throttled"
        );
    }
}
