//! Remote shell collaborator, shipped as a wrapper around the `ssh` client.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// `ssh` reserves exit status 255 for its own (connection) failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Handshake, authentication or connection failure. Retryable at the gate.
    #[error("ssh transport to {host}: {message}")]
    Transport { host: String, message: String },

    #[error("{0} is not installed or not in PATH")]
    ToolMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key_path: PathBuf,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>, key: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            private_key_path: key.into(),
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Proof that the transport handshake and authentication succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSession {
    pub target: SshTarget,
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Establish (or prove) a session; runs no user command.
    async fn connect(&self, target: &SshTarget) -> Result<SshSession, RemoteError>;

    /// Run one command. A non-zero exit is a value, not an error.
    async fn run_command(
        &self,
        session: &SshSession,
        command: &str,
    ) -> Result<CommandOutput, RemoteError>;
}

/// Non-interactive `ssh` with a throwaway known-hosts file.
#[derive(Debug, Clone)]
pub struct SshCli {
    binary: String,
    connect_timeout: Duration,
}

impl Default for SshCli {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SshCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn args(&self, target: &SshTarget, command: &str) -> Vec<String> {
        vec![
            "-i".into(),
            target.private_key_path.to_string_lossy().into_owned(),
            "-p".into(),
            target.port.to_string(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            target.destination(),
            command.to_string(),
        ]
    }

    async fn exec(&self, target: &SshTarget, command: &str) -> Result<CommandOutput, RemoteError> {
        debug!(host = %target.host, command, "ssh");
        let output = Command::new(&self.binary)
            .args(self.args(target, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RemoteError::ToolMissing(self.binary.clone()),
                _ => RemoteError::Io(e),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Judge the `true` login command. Only here is 255 unambiguous: a user
/// command may exit 255 itself (the aws CLI does), so `run_command` passes
/// every status through.
fn session_from_login(
    target: &SshTarget,
    probe: CommandOutput,
) -> Result<SshSession, RemoteError> {
    if probe.exit_code == SSH_TRANSPORT_EXIT {
        return Err(RemoteError::Transport {
            host: target.host.clone(),
            message: probe.stderr.trim().to_string(),
        });
    }
    if !probe.success() {
        return Err(RemoteError::Transport {
            host: target.host.clone(),
            message: format!("login probe exited {}", probe.exit_code),
        });
    }
    Ok(SshSession {
        target: target.clone(),
    })
}

#[async_trait]
impl RemoteShell for SshCli {
    async fn connect(&self, target: &SshTarget) -> Result<SshSession, RemoteError> {
        let probe = self.exec(target, "true").await?;
        session_from_login(target, probe)
    }

    async fn run_command(
        &self,
        session: &SshSession,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        self.exec(&session.target, command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SshTarget {
        SshTarget::new("54.1.2.3", "ec2-user", "/tmp/keys/k")
    }

    #[test]
    fn test_args_are_non_interactive() {
        let args = SshCli::default().args(&target(), "rpm -q pritunl");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args[args.len() - 2], "ec2-user@54.1.2.3");
        assert_eq!(args[args.len() - 1], "rpm -q pritunl");
    }

    #[test]
    fn test_login_classification() {
        let out = |exit_code: i32, stderr: &str| CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        };

        let err = session_from_login(&target(), out(255, "Connection refused\n")).unwrap_err();
        assert!(
            matches!(err, RemoteError::Transport { ref message, .. } if message == "Connection refused")
        );

        let err = session_from_login(&target(), out(1, "")).unwrap_err();
        assert!(err.to_string().contains("login probe exited 1"));

        let session = session_from_login(&target(), out(0, "")).unwrap();
        assert_eq!(session.target, target());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let shell = SshCli::new("vpnharness-no-such-ssh");
        let err = shell.connect(&target()).await.unwrap_err();
        assert!(matches!(err, RemoteError::ToolMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_codes_through_stand_in_binary() {
        // `false` ignores its arguments and exits 1: a command result, not a
        // transport failure
        let shell = SshCli::new("false");
        let session = SshSession { target: target() };
        let output = shell.run_command(&session, "anything").await.unwrap();
        assert_eq!(output.exit_code, 1);
        assert!(!output.success());

        let err = shell.connect(&target()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Transport { .. }));
    }
}
