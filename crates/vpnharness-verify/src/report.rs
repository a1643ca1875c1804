//! Run report generation

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vpnharness_core::{HarnessError, ReleasedResource, TeardownWarning};

use crate::runner::CheckResult;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed {
        /// Error class (`ApplyFailed`, `RetryExhausted`, ...)
        class: String,
        /// Failing check, for verification failures
        step: Option<String>,
        message: String,
    },
}

impl RunOutcome {
    pub fn from_error(err: &HarnessError) -> Self {
        let step = match err {
            HarnessError::VerificationFailed { step, .. } => Some(step.clone()),
            _ => None,
        };
        RunOutcome::Failed {
            class: err.class().to_string(),
            step,
            message: err.to_string(),
        }
    }
}

/// Everything known about one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// SHA-256 of the rendered template variables
    pub vars_digest: String,
    pub outcome: RunOutcome,
    pub checks: Vec<CheckResult>,
    /// Resources released during teardown, in release order
    pub released: Vec<ReleasedResource>,
    pub teardown_warnings: Vec<TeardownWarning>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Passed)
    }

    pub fn error_class(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Passed => None,
            RunOutcome::Failed { class, .. } => Some(class.as_str()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Save report as JSON
    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Human-readable summary. Check failures, run failures and teardown
    /// warnings each get their own label.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        let _ = writeln!(
            out,
            "Run {} {} in {:.1}s (started {}, vars {})",
            self.run_id,
            status,
            self.duration_ms as f64 / 1000.0,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            short(&self.vars_digest),
        );

        for check in &self.checks {
            let mark = if check.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "  [{}] {} ({}ms)", mark, check.step, check.duration_ms);
        }

        if let RunOutcome::Failed {
            class,
            step,
            message,
        } = &self.outcome
        {
            match step {
                Some(step) => {
                    let diagnostic = self
                        .checks
                        .iter()
                        .find(|c| &c.step == step)
                        .and_then(|c| c.diagnostic.as_deref())
                        .unwrap_or(message.as_str());
                    let _ = writeln!(out, "CHECK FAILED: {}: {}", step, diagnostic);
                }
                None => {
                    let _ = writeln!(out, "RUN FAILED: {}: {}", class, message);
                }
            }
        }

        for warning in &self.teardown_warnings {
            let _ = writeln!(out, "TEARDOWN WARNING: {}", warning);
        }

        if !self.released.is_empty() {
            let released: Vec<String> = self
                .released
                .iter()
                .map(|r| format!("{} {}", r.kind, r.label))
                .collect();
            let _ = writeln!(out, "Released: {}", released.join(", "));
        }
        out
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnharness_core::ResourceKind;

    fn report(outcome: RunOutcome) -> RunReport {
        RunReport {
            run_id: "abc".into(),
            started_at: Utc::now(),
            duration_ms: 61_500,
            vars_digest: "0123456789abcdef".into(),
            outcome,
            checks: vec![
                CheckResult {
                    step: "outbound".into(),
                    passed: true,
                    diagnostic: None,
                    duration_ms: 120,
                },
                CheckResult {
                    step: "bucket_read".into(),
                    passed: false,
                    diagnostic: Some("stdout did not match".into()),
                    duration_ms: 80,
                },
            ],
            released: vec![
                ReleasedResource {
                    kind: ResourceKind::Deployment,
                    label: "pritunl-instance-abc".into(),
                },
                ReleasedResource {
                    kind: ResourceKind::KeyPair,
                    label: "pritunl-test-key-abc".into(),
                },
            ],
            teardown_warnings: vec![],
        }
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
        // 12 bytes is not a char boundary here
        assert_eq!(short("aééééééé"), "aééééééé");
        assert_eq!(short("abcdefghijké"), "abcdefghijké");
    }

    #[test]
    fn test_check_failure_text() {
        let err = HarnessError::VerificationFailed {
            step: "bucket_read".into(),
            diagnostic: "stdout did not match".into(),
        };
        let text = report(RunOutcome::from_error(&err)).to_text();
        assert!(text.contains("Run abc FAILED in 61.5s"));
        assert!(text.contains("  [FAIL] bucket_read (80ms)"));
        assert!(text.contains("CHECK FAILED: bucket_read: stdout did not match"));
        assert!(!text.contains("RUN FAILED"));
        assert!(text.contains("Released: deployment pritunl-instance-abc, key_pair pritunl-test-key-abc"));
    }

    #[test]
    fn test_run_failure_and_teardown_warning_text() {
        let err = HarnessError::ApplyFailed("quota exceeded".into());
        let mut report = report(RunOutcome::from_error(&err));
        report.teardown_warnings.push(TeardownWarning {
            kind: ResourceKind::KeyPair,
            label: "pritunl-test-key-abc".into(),
            message: "throttled".into(),
        });

        let text = report.to_text();
        assert!(text.contains("RUN FAILED: ApplyFailed: apply failed: quota exceeded"));
        assert!(text.contains(
            "TEARDOWN WARNING: failed to release key_pair 'pritunl-test-key-abc': throttled"
        ));
        assert_eq!(report.error_class(), Some("ApplyFailed"));
    }

    #[test]
    fn test_json_roundtrip_keeps_outcome() {
        let report = report(RunOutcome::Passed);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"passed\""));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert!(back.passed());
        assert_eq!(back.released.len(), 2);
    }
}
