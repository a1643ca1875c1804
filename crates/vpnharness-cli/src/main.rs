//! VPN Harness CLI
//!
//! The `vpnharness` command provisions a Pritunl appliance from a Terraform
//! template, verifies it, and tears it down again.
//!
//! ## Commands
//!
//! - `run`: Execute one or more acceptance runs
//! - `vars`: Print the `-var` arguments a run would apply
//! - `checks`: List the builtin checks

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use terraform_driver::{is_engine_available, TerraformCli};
use tracing::{info, warn};
use vpnharness_core::telemetry::level_for_verbosity;
use vpnharness_core::{AwsCli, CancelToken, ReqwestProbe, RunConfig, RunContext, SshCli};
use vpnharness_verify::{BuiltinCheck, CheckPlan, Harness, RunReport};

/// Per-request timeout for management UI probes.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "vpnharness")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Acceptance tests for a Terraform-provisioned Pritunl VPN appliance", long_about = None)]
struct Cli {
    /// TOML run configuration
    #[arg(short, long, global = true, env = "VPNHARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision, verify and tear down
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Number of independent runs to execute concurrently
        #[arg(short, long, default_value = "1")]
        parallel: usize,

        /// Write the JSON report(s) to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the rendered template variables without applying anything
    Vars {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// List the builtin checks (* marks the default plan)
    Checks,
}

/// Command-line overrides, applied after the config file and environment.
#[derive(Args, Debug, Default, Clone)]
struct Overrides {
    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    vpc_id: Option<String>,

    #[arg(long)]
    public_subnet_id: Option<String>,

    #[arg(long)]
    ami_id: Option<String>,

    /// Directory holding the Terraform template
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Reuse a fixed run id instead of generating one
    #[arg(long)]
    run_id: Option<String>,

    #[arg(long)]
    max_attempts: Option<u32>,

    /// Comma-separated check names, in execution order
    #[arg(long, value_delimiter = ',')]
    checks: Option<Vec<String>>,
}

impl Overrides {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(v) = &self.region {
            config.region = v.clone();
        }
        if let Some(v) = &self.vpc_id {
            config.vpc_id = v.clone();
        }
        if let Some(v) = &self.public_subnet_id {
            config.public_subnet_id = v.clone();
        }
        if let Some(v) = &self.ami_id {
            config.ami_id = v.clone();
        }
        if let Some(v) = &self.template_dir {
            config.template_dir = v.clone();
        }
        if let Some(v) = &self.run_id {
            config.run_id = Some(v.clone());
        }
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = &self.checks {
            config.checks = Some(v.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    vpnharness_core::init_tracing(cli.json, level_for_verbosity(cli.verbose));

    match cli.command {
        Commands::Run {
            overrides,
            parallel,
            report,
        } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            let passed = cmd_run(&config, parallel, report.as_deref()).await?;
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Vars { overrides } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_vars(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Checks => {
            print!("{}", render_checks());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<RunConfig> {
    let mut config = RunConfig::load(path).context("Failed to load run configuration")?;
    overrides.apply(&mut config);
    config.validate().context("Invalid run configuration")?;
    Ok(config)
}

/// One context per run. A fixed run id names exactly one run.
fn contexts_for(config: &RunConfig, parallel: usize) -> Result<Vec<RunContext>> {
    if parallel == 0 {
        bail!("--parallel must be at least 1");
    }
    if parallel > 1 && config.run_id.is_some() {
        bail!("a fixed run id cannot be shared by {} parallel runs", parallel);
    }
    (0..parallel)
        .map(|_| RunContext::new(config).context("Failed to prepare run"))
        .collect()
}

fn build_harness(config: &RunConfig, cancel: CancelToken) -> Result<Harness> {
    let http = ReqwestProbe::new(config.accept_invalid_certs, HTTP_TIMEOUT)
        .context("Failed to build HTTP client")?;
    let harness = Harness::new(
        Arc::new(TerraformCli::new(config.terraform_bin.clone())),
        Arc::new(AwsCli::new(config.key_dir.clone())),
        Arc::new(SshCli::default()),
        Arc::new(http),
    );
    Ok(harness.with_cancel(cancel))
}

/// Ctrl-C cancels in-flight runs; their teardown still completes.
fn spawn_interrupt_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling runs and tearing down");
            cancel.cancel();
        }
    });
}

async fn cmd_run(config: &RunConfig, parallel: usize, report_path: Option<&Path>) -> Result<bool> {
    if !is_engine_available(&config.terraform_bin).await {
        bail!(
            "provisioning engine '{}' is not installed or not on PATH",
            config.terraform_bin
        );
    }

    let contexts = contexts_for(config, parallel)?;
    let plan = CheckPlan::from_config(config).context("Invalid check plan")?;
    let cancel = CancelToken::new();
    spawn_interrupt_handler(cancel.clone());
    let harness = build_harness(config, cancel)?;

    info!(runs = contexts.len(), region = %config.region, "Starting acceptance runs");
    let reports = if contexts.len() == 1 {
        vec![harness.run(&contexts[0], &plan).await]
    } else {
        harness.run_many(contexts, &plan).await
    };

    for report in &reports {
        print!("{}", report.to_text());
    }
    if let Some(path) = report_path {
        save_reports(&reports, path)?;
        println!("Report written to {}", path.display());
    }

    Ok(reports.iter().all(RunReport::passed))
}

/// A single run is written as one object, several as an array.
fn save_reports(reports: &[RunReport], path: &Path) -> Result<()> {
    match reports {
        [report] => report
            .save_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display())),
        _ => {
            let json = serde_json::to_string_pretty(reports)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))
        }
    }
}

fn cmd_vars(config: &RunConfig) -> Result<()> {
    let ctx = RunContext::new(config).context("Failed to prepare run")?;
    print!("{}", render_vars(&ctx)?);
    Ok(())
}

fn render_vars(ctx: &RunContext) -> Result<String> {
    let args = ctx.var_set()?.to_cli_args();
    let mut out = format!("# run {} ({})\n", ctx.run_id, ctx.template_dir.display());
    for pair in args.chunks(2) {
        let line: Vec<String> = pair.iter().map(|a| shell_quote(a)).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    Ok(out)
}

fn render_checks() -> String {
    let mut out = String::new();
    for check in BuiltinCheck::ALL {
        let marker = if BuiltinCheck::DEFAULT_PLAN.contains(&check) {
            '*'
        } else {
            ' '
        };
        out.push_str(&format!(
            "{} {:<16} {}\n",
            marker,
            check.name(),
            check.description()
        ));
    }
    out
}

fn shell_quote(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c));
    if plain && !arg.is_empty() {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
