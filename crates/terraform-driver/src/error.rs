//! Error types for terraform-driver

use thiserror::Error;

/// Errors that can occur while driving the provisioning engine
#[derive(Error, Debug)]
pub enum TerraformError {
    /// Engine binary not found
    #[error("{0} is not installed or not in PATH")]
    NotInstalled(String),

    /// Engine command exited non-zero; stderr is carried verbatim
    #[error("`{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Bringing the deployment up failed; never retried
    #[error("apply failed during {stage}: {source}")]
    ApplyFailed {
        stage: &'static str,
        #[source]
        source: Box<TerraformError>,
    },

    /// Tearing the deployment down failed
    #[error("destroy failed: {0}")]
    DestroyFailed(#[source] Box<TerraformError>),

    /// A named output was not published by the template
    #[error("Output not published by template: {0}")]
    OutputMissing(String),

    /// `output -json` produced something other than an output map
    #[error("Invalid outputs document: {0}")]
    InvalidOutputs(String),

    /// Variable name is not a valid Terraform identifier
    #[error("Invalid variable name: {0}")]
    InvalidVariable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TerraformError {
    /// Whether this error came from the engine itself (as opposed to local IO).
    pub fn is_engine_failure(&self) -> bool {
        match self {
            TerraformError::CommandFailed { .. } | TerraformError::NotInstalled(_) => true,
            TerraformError::ApplyFailed { source, .. } => source.is_engine_failure(),
            TerraformError::DestroyFailed(source) => source.is_engine_failure(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_carries_stderr() {
        let err = TerraformError::CommandFailed {
            command: "terraform apply".to_string(),
            exit_code: 1,
            stderr: "Error: creating EC2 Instance".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("terraform apply"));
        assert!(msg.contains("Error: creating EC2 Instance"));
        assert!(err.is_engine_failure());
    }

    #[test]
    fn test_apply_failed_wraps_stage() {
        let err = TerraformError::ApplyFailed {
            stage: "init",
            source: Box::new(TerraformError::NotInstalled("terraform".to_string())),
        };
        assert!(err.to_string().contains("during init"));
        assert!(err.is_engine_failure());
    }

    #[test]
    fn test_output_missing_display() {
        let err = TerraformError::OutputMissing("vpn_public_ip_address".to_string());
        assert!(err.to_string().contains("vpn_public_ip_address"));
        assert!(!err.is_engine_failure());
    }
}
