//! Single-step execution.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use vpnharness_core::{CloudApi, CommandOutput, HttpProbe, RemoteShell, SshSession};

use crate::stage::{CheckKind, CheckStep};

/// Longest stdout/stderr excerpt kept in a diagnostic.
const MAX_EXCERPT: usize = 2000;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Step name.
    pub step: String,

    pub passed: bool,

    /// Why the step failed (exit code, captured output, or collaborator error).
    pub diagnostic: Option<String>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

/// Everything a step may talk to during verification.
#[derive(Clone, Copy)]
pub struct CheckTarget<'a> {
    pub shell: &'a dyn RemoteShell,
    pub session: &'a SshSession,
    pub http: &'a dyn HttpProbe,
    pub cloud: &'a dyn CloudApi,
    pub region: &'a str,
}

/// Executes one resolved [`CheckStep`].
pub struct CheckRunner;

impl CheckRunner {
    /// Run `step` against `target`. Never fails: collaborator errors become
    /// a failed result carrying the error text.
    pub async fn execute(step: &CheckStep, target: &CheckTarget<'_>) -> CheckResult {
        let start = Instant::now();
        let verdict = match &step.kind {
            CheckKind::RemoteCommand { command, expect } => {
                match target.shell.run_command(target.session, command).await {
                    Ok(output) => judge_command(&output, expect.as_deref()),
                    Err(e) => Err(e.to_string()),
                }
            }
            CheckKind::Http {
                url,
                expected_status,
                expected_body,
            } => match target.http.get(url).await {
                Ok(response) => judge_http(
                    response.status,
                    &response.body,
                    *expected_status,
                    expected_body,
                ),
                Err(e) => Err(e.to_string()),
            },
            CheckKind::BucketExists { bucket } => {
                match target.cloud.bucket_exists(target.region, bucket).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(format!(
                        "bucket '{}' does not exist in {}",
                        bucket, target.region
                    )),
                    Err(e) => Err(e.to_string()),
                }
            }
        };

        CheckResult {
            step: step.name.clone(),
            passed: verdict.is_ok(),
            diagnostic: verdict.err(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn judge_command(output: &CommandOutput, expect: Option<&str>) -> Result<(), String> {
    if !output.success() {
        return Err(format!(
            "exit code {}\nstdout: {}\nstderr: {}",
            output.exit_code,
            excerpt(&output.stdout),
            excerpt(&output.stderr)
        ));
    }
    if let Some(pattern) = expect {
        let re = regex::Regex::new(pattern).map_err(|e| format!("invalid pattern: {}", e))?;
        if !re.is_match(&output.stdout) {
            return Err(format!(
                "stdout did not match /{}/\nstdout: {}",
                pattern,
                excerpt(&output.stdout)
            ));
        }
    }
    Ok(())
}

/// Status must match exactly; the body must contain `expected_body`.
pub(crate) fn judge_http(
    status: u16,
    body: &str,
    expected_status: u16,
    expected_body: &str,
) -> Result<(), String> {
    if status != expected_status {
        return Err(format!("expected HTTP {}, got {}", expected_status, status));
    }
    if !body.contains(expected_body) {
        return Err(format!("response body does not contain '{}'", expected_body));
    }
    Ok(())
}

fn excerpt(text: &str) -> &str {
    let text = text.trim();
    if text.len() <= MAX_EXCERPT {
        return text;
    }
    let mut end = MAX_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnharness_core::fakes::{failed, ok, FakeCloud, FakeHttp, FakeShell};
    use vpnharness_core::SshTarget;

    fn session() -> SshSession {
        SshSession {
            target: SshTarget::new("54.1.2.3", "ec2-user", "/k"),
        }
    }

    #[tokio::test]
    async fn test_remote_command_pass_and_fail() {
        let shell = FakeShell::new().with_handler(|cmd| match cmd {
            "rpm -q pritunl" => ok("pritunl-1.32.3-1.el8.x86_64"),
            _ => failed(1, "package mongodb-org is not installed"),
        });
        let http = FakeHttp::always(200, "");
        let cloud = FakeCloud::new();
        let session = session();
        let target = CheckTarget {
            shell: &shell,
            session: &session,
            http: &http,
            cloud: &cloud,
            region: "us-east-1",
        };

        let pass = CheckRunner::execute(&CheckStep::remote("pritunl", "rpm -q pritunl"), &target).await;
        assert!(pass.passed);
        assert!(pass.diagnostic.is_none());

        let fail =
            CheckRunner::execute(&CheckStep::remote("mongo", "rpm -q mongodb-org"), &target).await;
        assert!(!fail.passed);
        let diagnostic = fail.diagnostic.unwrap();
        assert!(diagnostic.contains("exit code 1"));
        assert!(diagnostic.contains("not installed"));
    }

    #[tokio::test]
    async fn test_expect_pattern() {
        let shell = FakeShell::new().with_handler(|_| ok("Active: inactive (dead)"));
        let http = FakeHttp::always(200, "");
        let cloud = FakeCloud::new();
        let session = session();
        let target = CheckTarget {
            shell: &shell,
            session: &session,
            http: &http,
            cloud: &cloud,
            region: "us-east-1",
        };

        let step = CheckStep::remote_expecting("ssm", "systemctl status x", r"active \(running\)");
        let result = CheckRunner::execute(&step, &target).await;
        assert!(!result.passed);
        assert!(result.diagnostic.unwrap().contains("did not match"));
    }

    #[tokio::test]
    async fn test_bucket_and_http_steps() {
        let shell = FakeShell::new();
        let http = FakeHttp::always(503, "starting");
        let cloud = FakeCloud::new().with_bucket("pritunl-backups-abc");
        let session = session();
        let target = CheckTarget {
            shell: &shell,
            session: &session,
            http: &http,
            cloud: &cloud,
            region: "us-east-1",
        };

        let exists = CheckStep {
            name: "bucket_exists".into(),
            kind: CheckKind::BucketExists {
                bucket: "pritunl-backups-abc".into(),
            },
        };
        assert!(CheckRunner::execute(&exists, &target).await.passed);

        let missing = CheckStep {
            name: "bucket_exists".into(),
            kind: CheckKind::BucketExists {
                bucket: "other".into(),
            },
        };
        assert!(!CheckRunner::execute(&missing, &target).await.passed);

        let ui = CheckStep {
            name: "management_ui".into(),
            kind: CheckKind::Http {
                url: "https://54.1.2.3".into(),
                expected_status: 200,
                expected_body: String::new(),
            },
        };
        let result = CheckRunner::execute(&ui, &target).await;
        assert_eq!(result.diagnostic.as_deref(), Some("expected HTTP 200, got 503"));
    }

    #[test]
    fn test_judge_http() {
        assert!(judge_http(200, "<title>Pritunl</title>", 200, "Pritunl").is_ok());
        assert!(judge_http(200, "nginx", 200, "Pritunl").is_err());
        assert!(judge_http(200, "anything", 200, "").is_ok());
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_EXCERPT);
        let cut = excerpt(&long);
        assert!(cut.len() <= MAX_EXCERPT);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
