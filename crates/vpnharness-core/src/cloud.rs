//! Cloud resource API: key pairs and object-store buckets.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors from the cloud collaborator. Never retried.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("{0} is not installed or not in PATH")]
    ToolMissing(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key pair registered in the cloud account, with its local private half.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub name: String,
    pub region: String,
    pub public_key: String,
    pub private_key_path: PathBuf,
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Generate a key pair locally and register its public half.
    async fn create_key_pair(&self, region: &str, name: &str) -> Result<KeyPair, CloudError>;

    /// Deregister the key pair and remove the local key material.
    async fn delete_key_pair(&self, key: &KeyPair) -> Result<(), CloudError>;

    async fn bucket_exists(&self, region: &str, bucket: &str) -> Result<bool, CloudError>;
}

/// Drives the `aws` and `ssh-keygen` binaries.
#[derive(Debug, Clone)]
pub struct AwsCli {
    aws_bin: String,
    keygen_bin: String,
    key_dir: PathBuf,
}

impl AwsCli {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            aws_bin: "aws".to_string(),
            keygen_bin: "ssh-keygen".to_string(),
            key_dir: key_dir.into(),
        }
    }

    pub fn with_binaries(
        mut self,
        aws_bin: impl Into<String>,
        keygen_bin: impl Into<String>,
    ) -> Self {
        self.aws_bin = aws_bin.into();
        self.keygen_bin = keygen_bin.into();
        self
    }

    pub fn key_path(&self, name: &str) -> PathBuf {
        self.key_dir.join(name)
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>, CloudError> {
        let shown = format!("{} {}", program, args[..args.len().min(2)].join(" "));
        debug!(command = %shown, "Running cloud command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CloudError::ToolMissing(program.to_string()),
                _ => CloudError::Io(e),
            })?;

        if !output.status.success() {
            return Err(CloudError::CommandFailed {
                command: shown,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn public_key_path(private: &Path) -> PathBuf {
    let mut path = private.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

#[async_trait]
impl CloudApi for AwsCli {
    async fn create_key_pair(&self, region: &str, name: &str) -> Result<KeyPair, CloudError> {
        tokio::fs::create_dir_all(&self.key_dir).await?;
        let private = self.key_path(name);
        let public = public_key_path(&private);
        // ssh-keygen prompts before overwriting
        remove_if_present(&private)?;
        remove_if_present(&public)?;

        let keygen_args: Vec<String> = vec![
            "-q".into(),
            "-t".into(),
            "rsa".into(),
            "-b".into(),
            "4096".into(),
            "-m".into(),
            "PEM".into(),
            "-N".into(),
            String::new(),
            "-C".into(),
            name.into(),
            "-f".into(),
            private.to_string_lossy().into_owned(),
        ];
        self.run(&self.keygen_bin, &keygen_args).await?;
        let public_key = tokio::fs::read_to_string(&public).await?.trim().to_string();

        let import_args: Vec<String> = vec![
            "ec2".into(),
            "import-key-pair".into(),
            "--region".into(),
            region.into(),
            "--key-name".into(),
            name.into(),
            "--public-key-material".into(),
            format!("fileb://{}", public.display()),
        ];
        if let Err(e) = self.run(&self.aws_bin, &import_args).await {
            // never registered, so no release will remove these
            if let Err(io) = remove_if_present(&private).and_then(|_| remove_if_present(&public)) {
                warn!(name, error = %io, "Could not remove local key material");
            }
            return Err(e);
        }

        info!(name, region, "Key pair registered");
        Ok(KeyPair {
            name: name.to_string(),
            region: region.to_string(),
            public_key,
            private_key_path: private,
        })
    }

    async fn delete_key_pair(&self, key: &KeyPair) -> Result<(), CloudError> {
        let args: Vec<String> = vec![
            "ec2".into(),
            "delete-key-pair".into(),
            "--region".into(),
            key.region.clone(),
            "--key-name".into(),
            key.name.clone(),
        ];
        let remote = self.run(&self.aws_bin, &args).await;

        // local material goes regardless of the remote outcome
        if let Err(e) = remove_if_present(&key.private_key_path)
            .and_then(|_| remove_if_present(&public_key_path(&key.private_key_path)))
        {
            warn!(name = %key.name, error = %e, "Could not remove local key material");
        }

        remote.map(|_| ())
    }

    async fn bucket_exists(&self, region: &str, bucket: &str) -> Result<bool, CloudError> {
        let args: Vec<String> = vec![
            "s3api".into(),
            "head-bucket".into(),
            "--region".into(),
            region.into(),
            "--bucket".into(),
            bucket.into(),
        ];
        match self.run(&self.aws_bin, &args).await {
            Ok(_) => Ok(true),
            Err(CloudError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// `head-bucket` reports a missing bucket as a 404 on stderr.
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("404") || stderr.contains("Not Found") || stderr.contains("NoSuchBucket")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/tmp/keys/pritunl-test-key-abc")),
            PathBuf::from("/tmp/keys/pritunl-test-key-abc.pub")
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(
            "An error occurred (404) when calling the HeadBucket operation: Not Found"
        ));
        assert!(!is_not_found(
            "An error occurred (403) when calling the HeadBucket operation: Forbidden"
        ));
    }

    #[test]
    fn test_remove_if_present_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");
        assert!(remove_if_present(&path).is_ok());
        std::fs::write(&path, "key").unwrap();
        assert!(remove_if_present(&path).is_ok());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cli = AwsCli::new(dir.path()).with_binaries(
            "vpnharness-no-such-aws",
            "vpnharness-no-such-keygen",
        );
        let err = cli.create_key_pair("us-east-1", "k").await.unwrap_err();
        assert!(matches!(err, CloudError::ToolMissing(ref t) if t == "vpnharness-no-such-keygen"));

        let err = cli.bucket_exists("us-east-1", "b").await.unwrap_err();
        assert!(matches!(err, CloudError::ToolMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_import_discards_local_keys() {
        let dir = tempfile::tempdir().unwrap();
        // real ssh-keygen, an `aws` that always exits 1
        let cli = AwsCli::new(dir.path()).with_binaries("false", "ssh-keygen");
        let err = cli
            .create_key_pair("us-east-1", "pritunl-test-key-abc")
            .await
            .unwrap_err();
        match err {
            CloudError::CommandFailed { command, .. } => {
                assert_eq!(command, "false ec2 import-key-pair")
            }
            // no ssh-keygen on this host; nothing was generated
            CloudError::ToolMissing(tool) => assert_eq!(tool, "ssh-keygen"),
            other => panic!("unexpected error {:?}", other),
        }

        let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(left.is_empty(), "key material left behind: {:?}", left);
    }
}
