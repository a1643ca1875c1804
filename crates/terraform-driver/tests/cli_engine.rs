//! Integration tests for `TerraformCli` against a scripted stand-in binary.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use terraform_driver::{DeploymentDriver, TerraformCli, TerraformError, VarSet};
use tempfile::TempDir;

/// Write a fake `terraform` that logs its arguments and answers `output -json`.
fn fake_terraform(dir: &Path, apply_exit: i32) -> PathBuf {
    let log = dir.join("calls.log");
    let script = format!(
        r#"#!/bin/sh
echo "$@" >> {log}
case "$1" in
  output)
    echo '{{"vpn_public_ip_address": {{"value": "54.1.2.3", "type": "string", "sensitive": false}}}}'
    ;;
  apply)
    if [ {apply_exit} -ne 0 ]; then
      echo "Error: creating EC2 Instance" >&2
      exit {apply_exit}
    fi
    ;;
esac
exit 0
"#,
        log = log.display(),
        apply_exit = apply_exit,
    );
    let path = dir.join("terraform");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn vars() -> VarSet {
    VarSet::new()
        .with("aws_region", "us-east-1")
        .unwrap()
        .with("whitelist", vec!["0.0.0.0/0".to_string()])
        .unwrap()
}

// The scenarios share one test so no other test thread can fork while a
// script is still open for writing (ETXTBSY).
#[tokio::test]
async fn test_cli_engine_scenarios() {
    apply_reads_outputs().await;
    apply_failure_carries_stderr().await;
    destroy_passes_vars().await;
}

async fn apply_reads_outputs() {
    let bin_dir = TempDir::new().unwrap();
    let template = TempDir::new().unwrap();
    let binary = fake_terraform(bin_dir.path(), 0);

    let driver = DeploymentDriver::new(Arc::new(TerraformCli::new(binary.to_string_lossy())));
    let outputs = driver.apply(template.path(), &vars()).await.expect("apply failed");

    assert_eq!(outputs.read_output("vpn_public_ip_address").unwrap(), "54.1.2.3");

    let calls = calls(bin_dir.path());
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with("init"));
    assert!(calls[1].starts_with("apply"));
    assert!(calls[1].contains("-auto-approve"));
    assert!(calls[1].contains(r#"whitelist=["0.0.0.0/0"]"#));
    assert!(calls[2].starts_with("output"));
}

async fn apply_failure_carries_stderr() {
    let bin_dir = TempDir::new().unwrap();
    let template = TempDir::new().unwrap();
    let binary = fake_terraform(bin_dir.path(), 1);

    let driver = DeploymentDriver::new(Arc::new(TerraformCli::new(binary.to_string_lossy())));
    let err = driver.apply(template.path(), &vars()).await.unwrap_err();

    assert!(matches!(err, TerraformError::ApplyFailed { stage: "apply", .. }));
    assert!(err.to_string().contains("Error: creating EC2 Instance"));
    // no output read after a failed apply
    assert_eq!(calls(bin_dir.path()).len(), 2);
}

async fn destroy_passes_vars() {
    let bin_dir = TempDir::new().unwrap();
    let template = TempDir::new().unwrap();
    let binary = fake_terraform(bin_dir.path(), 0);

    let driver = DeploymentDriver::new(Arc::new(TerraformCli::new(binary.to_string_lossy())));
    let handle = driver.prepare(template.path(), vars());
    handle.destroy().await.expect("destroy failed");
    handle.destroy().await.expect("second destroy is a no-op");

    let calls = calls(bin_dir.path());
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("destroy"));
    assert!(calls[0].contains("aws_region=us-east-1"));
}
