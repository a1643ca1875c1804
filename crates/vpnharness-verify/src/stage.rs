//! Check definitions and the ordered check plan.

use serde::{Deserialize, Serialize};
use terraform_driver::OutputSet;
use vpnharness_core::{HarnessError, Result, RunConfig, RunContext};

/// Output holding the appliance's public address.
pub const OUTPUT_PUBLIC_IP: &str = "vpn_public_ip_address";
/// Output holding the backup bucket name.
pub const OUTPUT_BUCKET: &str = "s3_bucket_name";
/// Output holding the management UI URL.
pub const OUTPUT_MANAGEMENT_UI: &str = "vpn_management_ui";

/// Builtin appliance checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinCheck {
    /// The instance can reach the internet
    Outbound,
    /// SSM agent service is running
    SsmAgent,
    /// `pritunl` package installed
    PritunlPackage,
    /// `mongodb-org` package installed
    MongodbPackage,
    /// Pritunl logrotate policy parses
    Logrotate,
    /// Management UI answers over HTTPS
    ManagementUi,
    /// Backup bucket exists (cloud API)
    BucketExists,
    BucketList,
    BucketWrite,
    BucketRead,
    BucketDelete,
    BucketAbsent,
}

impl BuiltinCheck {
    pub const ALL: [BuiltinCheck; 12] = [
        BuiltinCheck::Outbound,
        BuiltinCheck::SsmAgent,
        BuiltinCheck::PritunlPackage,
        BuiltinCheck::MongodbPackage,
        BuiltinCheck::Logrotate,
        BuiltinCheck::ManagementUi,
        BuiltinCheck::BucketExists,
        BuiltinCheck::BucketList,
        BuiltinCheck::BucketWrite,
        BuiltinCheck::BucketRead,
        BuiltinCheck::BucketDelete,
        BuiltinCheck::BucketAbsent,
    ];

    /// Plan used when none is configured.
    pub const DEFAULT_PLAN: [BuiltinCheck; 9] = [
        BuiltinCheck::Outbound,
        BuiltinCheck::SsmAgent,
        BuiltinCheck::PritunlPackage,
        BuiltinCheck::BucketExists,
        BuiltinCheck::BucketList,
        BuiltinCheck::BucketWrite,
        BuiltinCheck::BucketRead,
        BuiltinCheck::BucketDelete,
        BuiltinCheck::BucketAbsent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinCheck::Outbound => "outbound",
            BuiltinCheck::SsmAgent => "ssm_agent",
            BuiltinCheck::PritunlPackage => "pritunl_package",
            BuiltinCheck::MongodbPackage => "mongodb_package",
            BuiltinCheck::Logrotate => "logrotate",
            BuiltinCheck::ManagementUi => "management_ui",
            BuiltinCheck::BucketExists => "bucket_exists",
            BuiltinCheck::BucketList => "bucket_list",
            BuiltinCheck::BucketWrite => "bucket_write",
            BuiltinCheck::BucketRead => "bucket_read",
            BuiltinCheck::BucketDelete => "bucket_delete",
            BuiltinCheck::BucketAbsent => "bucket_absent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinCheck::Outbound => "instance reaches the internet (curl)",
            BuiltinCheck::SsmAgent => "amazon-ssm-agent service is active",
            BuiltinCheck::PritunlPackage => "pritunl package is installed",
            BuiltinCheck::MongodbPackage => "mongodb-org package is installed",
            BuiltinCheck::Logrotate => "logrotate policy for pritunl is valid",
            BuiltinCheck::ManagementUi => "management UI returns the expected page",
            BuiltinCheck::BucketExists => "backup bucket exists",
            BuiltinCheck::BucketList => "instance can list the backup bucket",
            BuiltinCheck::BucketWrite => "instance can write a probe object",
            BuiltinCheck::BucketRead => "probe object reads back unchanged",
            BuiltinCheck::BucketDelete => "instance can delete the probe object",
            BuiltinCheck::BucketAbsent => "probe object is gone after delete",
        }
    }

    pub fn needs_bucket(&self) -> bool {
        matches!(
            self,
            BuiltinCheck::BucketExists
                | BuiltinCheck::BucketList
                | BuiltinCheck::BucketWrite
                | BuiltinCheck::BucketRead
                | BuiltinCheck::BucketDelete
                | BuiltinCheck::BucketAbsent
        )
    }
}

/// What a step asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    /// Exit status zero and, if set, stdout matching the `expect` regex
    RemoteCommand {
        command: String,
        expect: Option<String>,
    },
    /// One-shot HTTP assertion
    Http {
        url: String,
        expected_status: u16,
        expected_body: String,
    },
    /// Cloud API bucket existence in the run's region
    BucketExists { bucket: String },
}

/// One concrete, resolved verification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStep {
    pub name: String,
    pub kind: CheckKind,
}

impl CheckStep {
    pub fn remote(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CheckKind::RemoteCommand {
                command: command.into(),
                expect: None,
            },
        }
    }

    /// Remote command whose stdout must match `pattern`.
    pub fn remote_expecting(
        name: impl Into<String>,
        command: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: CheckKind::RemoteCommand {
                command: command.into(),
                expect: Some(pattern.into()),
            },
        }
    }
}

/// Expected answer from the management UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpExpectation {
    pub status: u16,
    /// Substring the body must contain; empty accepts any body
    pub body: String,
}

impl Default for HttpExpectation {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanEntry {
    Builtin(BuiltinCheck),
    Custom(CheckStep),
}

/// Ordered list of checks, resolved per run into concrete steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPlan {
    pub entries: Vec<PlanEntry>,
    pub management_ui: HttpExpectation,
    /// Wait for the management UI before the SSH gate
    pub http_gate: bool,
}

impl Default for CheckPlan {
    fn default() -> Self {
        Self::builtin(&BuiltinCheck::DEFAULT_PLAN)
    }
}

impl CheckPlan {
    pub fn builtin(checks: &[BuiltinCheck]) -> Self {
        Self {
            entries: checks.iter().copied().map(PlanEntry::Builtin).collect(),
            management_ui: HttpExpectation::default(),
            http_gate: false,
        }
    }

    /// Plan named by the configuration, or the default plan.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let mut plan = match &config.checks {
            None => Self::default(),
            Some(names) => {
                let mut checks = Vec::with_capacity(names.len());
                for name in names {
                    let check = BuiltinCheck::from_name(name).ok_or_else(|| {
                        HarnessError::InvalidConfig(format!("unknown check '{}'", name))
                    })?;
                    checks.push(check);
                }
                Self::builtin(&checks)
            }
        };
        plan.management_ui = HttpExpectation {
            status: config.management_ui_status,
            body: config.management_ui_body.clone(),
        };
        plan.http_gate = config.http_gate;
        Ok(plan)
    }

    pub fn with_step(mut self, step: CheckStep) -> Self {
        self.entries.push(PlanEntry::Custom(step));
        self
    }

    fn needs_bucket(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, PlanEntry::Builtin(c) if c.needs_bucket()))
    }

    fn needs_management_ui(&self) -> bool {
        self.http_gate
            || self
                .entries
                .iter()
                .any(|e| matches!(e, PlanEntry::Builtin(BuiltinCheck::ManagementUi)))
    }

    /// Turn the plan into concrete steps for one run.
    ///
    /// Fails with `OutputMissing` when a planned check needs an output the
    /// template did not publish, and with `InvalidConfig` on a bad pattern.
    pub fn resolve(&self, ctx: &RunContext, outputs: &OutputSet) -> Result<Vec<CheckStep>> {
        let bucket = if self.needs_bucket() {
            Some(read(outputs, OUTPUT_BUCKET)?)
        } else {
            None
        };
        let management_ui = if self.needs_management_ui() {
            Some(read(outputs, OUTPUT_MANAGEMENT_UI)?)
        } else {
            None
        };
        let probe = ObjectProbe::for_run(ctx);

        let mut steps = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let step = match entry {
                PlanEntry::Custom(step) => step.clone(),
                PlanEntry::Builtin(check) => builtin_step(
                    *check,
                    &ctx.region,
                    bucket.as_deref().unwrap_or_default(),
                    management_ui.as_deref().unwrap_or_default(),
                    &self.management_ui,
                    &probe,
                ),
            };
            if let CheckKind::RemoteCommand {
                expect: Some(pattern),
                ..
            } = &step.kind
            {
                regex::Regex::new(pattern).map_err(|e| {
                    HarnessError::InvalidConfig(format!("check '{}': {}", step.name, e))
                })?;
            }
            steps.push(step);
        }
        Ok(steps)
    }
}

fn read(outputs: &OutputSet, name: &str) -> Result<String> {
    Ok(outputs.read_output(name)?.to_string())
}

/// Fresh per-run object used by the object-store round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProbe {
    pub key: String,
    pub content: String,
}

impl ObjectProbe {
    pub fn for_run(ctx: &RunContext) -> Self {
        Self {
            key: format!("vpnharness-probe-{}.txt", ctx.run_id),
            content: format!("vpnharness probe {}", ctx.run_id),
        }
    }
}

fn builtin_step(
    check: BuiltinCheck,
    region: &str,
    bucket: &str,
    management_ui: &str,
    expectation: &HttpExpectation,
    probe: &ObjectProbe,
) -> CheckStep {
    let name = check.name();
    let object = format!("s3://{}/{}", bucket, probe.key);
    match check {
        BuiltinCheck::Outbound => {
            CheckStep::remote(name, "curl -sS -o /dev/null https://google.com")
        }
        BuiltinCheck::SsmAgent => CheckStep::remote_expecting(
            name,
            "sudo systemctl status amazon-ssm-agent",
            r"active \(running\)",
        ),
        BuiltinCheck::PritunlPackage => CheckStep::remote(name, "rpm -q pritunl"),
        BuiltinCheck::MongodbPackage => CheckStep::remote(name, "rpm -q mongodb-org"),
        BuiltinCheck::Logrotate => {
            CheckStep::remote(name, "sudo logrotate -d /etc/logrotate.d/pritunl")
        }
        BuiltinCheck::ManagementUi => CheckStep {
            name: name.to_string(),
            kind: CheckKind::Http {
                url: management_ui.to_string(),
                expected_status: expectation.status,
                expected_body: expectation.body.clone(),
            },
        },
        BuiltinCheck::BucketExists => CheckStep {
            name: name.to_string(),
            kind: CheckKind::BucketExists {
                bucket: bucket.to_string(),
            },
        },
        BuiltinCheck::BucketList => CheckStep::remote(
            name,
            format!("aws s3 ls s3://{} --region {}", bucket, region),
        ),
        BuiltinCheck::BucketWrite => CheckStep::remote(
            name,
            format!(
                "printf '%s' '{content}' | aws s3 cp - {object} --region {region}",
                content = probe.content,
                object = object,
                region = region,
            ),
        ),
        BuiltinCheck::BucketRead => CheckStep::remote_expecting(
            name,
            format!("aws s3 cp {} - --region {}", object, region),
            format!("(?m)^{}$", regex::escape(&probe.content)),
        ),
        BuiltinCheck::BucketDelete => CheckStep::remote(
            name,
            format!("aws s3 rm {} --region {}", object, region),
        ),
        // only a 404 proves absence; denied or failed lookups must not pass
        BuiltinCheck::BucketAbsent => CheckStep::remote(
            name,
            format!(
                "aws s3api head-object --bucket {} --key {} --region {} 2>&1 | grep -qF '(404)'",
                bucket, probe.key, region
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnharness_core::RunId;

    fn ctx() -> RunContext {
        let config = RunConfig {
            vpc_id: "vpc-1".into(),
            public_subnet_id: "subnet-1".into(),
            ami_id: "ami-1".into(),
            ..RunConfig::default()
        };
        RunContext::from_config(&config, RunId::parse("abc").unwrap()).unwrap()
    }

    fn outputs() -> OutputSet {
        OutputSet::from_pairs([
            (OUTPUT_PUBLIC_IP, "54.1.2.3"),
            (OUTPUT_BUCKET, "pritunl-backups-abc"),
            (OUTPUT_MANAGEMENT_UI, "https://54.1.2.3"),
        ])
    }

    #[test]
    fn test_builtin_names_roundtrip() {
        for check in BuiltinCheck::ALL {
            assert_eq!(BuiltinCheck::from_name(check.name()), Some(check));
        }
        assert_eq!(BuiltinCheck::from_name("nope"), None);
    }

    #[test]
    fn test_default_plan_order() {
        let steps = CheckPlan::default().resolve(&ctx(), &outputs()).unwrap();
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "outbound",
                "ssm_agent",
                "pritunl_package",
                "bucket_exists",
                "bucket_list",
                "bucket_write",
                "bucket_read",
                "bucket_delete",
                "bucket_absent"
            ]
        );
    }

    #[test]
    fn test_object_steps_share_probe_key() {
        let steps = CheckPlan::default().resolve(&ctx(), &outputs()).unwrap();
        let key = "s3://pritunl-backups-abc/vpnharness-probe-abc.txt";
        for name in ["bucket_write", "bucket_read", "bucket_delete"] {
            let step = steps.iter().find(|s| s.name == name).unwrap();
            match &step.kind {
                CheckKind::RemoteCommand { command, .. } => {
                    assert!(command.contains(key), "{}: {}", name, command)
                }
                other => panic!("unexpected kind {:?}", other),
            }
        }
    }

    #[test]
    fn test_absent_check_requires_not_found() {
        let steps = CheckPlan::builtin(&[BuiltinCheck::BucketAbsent])
            .resolve(&ctx(), &outputs())
            .unwrap();
        match &steps[0].kind {
            CheckKind::RemoteCommand { command, expect } => {
                assert!(!command.starts_with('!'), "{}", command);
                assert!(command.contains("--bucket pritunl-backups-abc"));
                assert!(command.contains("--key vpnharness-probe-abc.txt"));
                assert!(command.ends_with("| grep -qF '(404)'"), "{}", command);
                assert!(expect.is_none());
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_write_streams_without_staging_file() {
        let steps = CheckPlan::builtin(&[BuiltinCheck::BucketWrite])
            .resolve(&ctx(), &outputs())
            .unwrap();
        match &steps[0].kind {
            CheckKind::RemoteCommand { command, .. } => {
                assert!(command.contains("| aws s3 cp - s3://"), "{}", command);
                assert!(!command.contains("/tmp/"), "{}", command);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_bucket_checks_require_output() {
        let outputs = OutputSet::from_pairs([(OUTPUT_PUBLIC_IP, "54.1.2.3")]);
        let err = CheckPlan::default().resolve(&ctx(), &outputs).unwrap_err();
        assert!(matches!(err, HarnessError::OutputMissing { ref name } if name == OUTPUT_BUCKET));

        let plan = CheckPlan::builtin(&[BuiltinCheck::Outbound]);
        assert_eq!(plan.resolve(&ctx(), &outputs).unwrap().len(), 1);
    }

    #[test]
    fn test_management_ui_step_uses_expectation() {
        let mut plan = CheckPlan::builtin(&[BuiltinCheck::ManagementUi]);
        plan.management_ui = HttpExpectation {
            status: 200,
            body: "Pritunl".into(),
        };
        let steps = plan.resolve(&ctx(), &outputs()).unwrap();
        assert_eq!(
            steps[0].kind,
            CheckKind::Http {
                url: "https://54.1.2.3".into(),
                expected_status: 200,
                expected_body: "Pritunl".into(),
            }
        );
    }

    #[test]
    fn test_from_config() {
        let mut config = RunConfig {
            checks: Some(vec!["outbound".into(), "logrotate".into()]),
            http_gate: true,
            ..RunConfig::default()
        };
        let plan = CheckPlan::from_config(&config).unwrap();
        assert_eq!(
            plan.entries,
            vec![
                PlanEntry::Builtin(BuiltinCheck::Outbound),
                PlanEntry::Builtin(BuiltinCheck::Logrotate)
            ]
        );
        assert!(plan.http_gate);

        config.checks = Some(vec!["reboot".into()]);
        assert_eq!(CheckPlan::from_config(&config).unwrap_err().class(), "InvalidConfig");
    }

    #[test]
    fn test_bad_custom_pattern_is_rejected() {
        let plan = CheckPlan::builtin(&[]).with_step(CheckStep::remote_expecting("x", "true", "(("));
        assert_eq!(plan.resolve(&ctx(), &outputs()).unwrap_err().class(), "InvalidConfig");
    }
}
