//! nodecycle: replace outdated cluster nodes with fresh ones, one fleet
//! group at a time.
//!
//! # Usage
//!
//! ```text
//! nodecycle --cluster-name prod --plan
//! nodecycle -c prod --config nodecycle.toml --run-mode 3
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use nodecycle_aws::AwsFleet;
use nodecycle_kube::KubeOrchestrator;
use nodecycle_rollout::Engine;

mod settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "nodecycle",
    about = "Rolling replacement of outdated Kubernetes worker nodes",
    version
)]
struct Cli {
    /// Cluster whose owned fleet groups are cycled.
    #[arg(short, long, env = "NODECYCLE_CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// Print which members are outdated and exit.
    #[arg(short, long)]
    plan: bool,

    /// Walk the full decision path without mutating anything.
    #[arg(long)]
    dry_run: bool,

    /// Orchestration variant (1-4).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
    run_mode: Option<u8>,

    /// TOML configuration file.
    #[arg(long, env = "NODECYCLE_CONFIG")]
    config: Option<PathBuf>,

    /// Only cycle this group. Repeatable.
    #[arg(short, long = "group")]
    groups: Vec<String>,

    /// Provider region passed to the fleet client.
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Provider credentials profile.
    #[arg(long, env = "AWS_PROFILE")]
    profile: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Format of the plan and run reports.
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,nodecycle=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = settings::load(&cli)?;
    info!(
        cluster = %config.cluster_name,
        run_mode = u8::from(config.run_mode),
        dry_run = config.dry_run,
        "nodecycle starting"
    );

    let fleet = AwsFleet::new()
        .with_region(cli.region.clone())
        .with_profile(cli.profile.clone());
    let orchestrator = KubeOrchestrator::try_default().await?;
    let engine = Engine::new(fleet, orchestrator, config);

    if cli.plan {
        let plan = engine.plan().await?;
        match cli.output {
            OutputFormat::Text => {
                for line in plan.summary_lines() {
                    println!("{line}");
                }
                println!("{} outdated members in total", plan.outdated_total());
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        }
        return Ok(());
    }

    let report = engine.run().await?;
    match cli.output {
        OutputFormat::Text => {
            for group in &report.completed {
                println!("{group}: replaced");
            }
            for group in &report.skipped {
                println!("{group}: nothing to do");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        "rolling update finished"
    );
    Ok(())
}
