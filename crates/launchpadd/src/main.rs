//! launchpadd — the Launchpad daemon.
//!
//! Single binary that assembles the release pipeline:
//! - State store (redb)
//! - Artifact registry (filesystem)
//! - Traffic controller client
//! - Smoke runner
//! - Orchestrator + recovery sweep
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! launchpadd serve --config launchpad.toml --port 8480 --data-dir /var/lib/launchpad
//! launchpadd validate --artifact /var/lib/launchpad/artifacts/clf-42
//! ```

mod serve;
mod validate;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use launchpad_core::LaunchpadConfig;

const DEFAULT_FILTER: &str = "info,launchpadd=debug,launchpad=debug";

#[derive(Parser)]
#[command(name = "launchpadd", about = "Launchpad model release daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the release pipeline and its API.
    Serve {
        /// Configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `[daemon] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `[daemon] data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Verify an artifact directory and run the validation gate offline.
    Validate {
        /// Directory holding `artifact.json` and `model.bin`.
        #[arg(long)]
        artifact: PathBuf,

        /// Configuration file supplying the threshold policy.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.daemon.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.daemon.data_dir = data_dir;
            }
            serve::run_serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { artifact, config } => {
            let config = load_config(config.as_deref())?;
            let report = validate::validate_artifact_dir(&artifact, &config.policy).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LaunchpadConfig> {
    match path {
        Some(path) => LaunchpadConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("load {}: {e}", path.display())),
        None => Ok(LaunchpadConfig::default()),
    }
}
