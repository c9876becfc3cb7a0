//! fleetroll — rolling replacement of compute-group members.
//!
//! Every command works against a fleet file: the serialized state of a
//! simulated control plane, loaded at start and written back at the end.
//!
//! ```text
//! fleetroll ensure  --fleet fleet.json --group web --launch-config lc-1 --min 2 --max 4
//! fleetroll replace --fleet fleet.json --group web --launch-config lc-2 --all
//! fleetroll show    --fleet fleet.json --group web
//! ```
//!
//! Each command prints `{ "changed": bool, "group": {...} }` on stdout.
//! Failures print `{ "changed": bool, "error": { "kind", "message" } }` and
//! exit non-zero.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, warn};

use fleetroll_core::FleetConfig;

mod commands;
mod logging;

use commands::group::EnsureArgs;
use commands::replace::ReplaceArgs;
use commands::{Context, Failure, Report, Target, invalid};
use logging::LogFormat;

#[derive(Parser)]
#[command(
    name = "fleetroll",
    about = "fleetroll — rolling replacement of compute-group members",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to fleetroll.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log output format [config: logging.format]
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace old members a batch at a time
    Replace(ReplaceArgs),
    /// Create a group, or update it to match the given shape
    Ensure(EnsureArgs),
    /// Drain a group to zero and delete it
    Delete(Target),
    /// Print a group (advances the simulation one tick)
    Show(Target),
}

fn load_config(path: Option<&Path>) -> Result<FleetConfig, Failure> {
    match path {
        Some(path) => FleetConfig::from_file(path)
            .map_err(|e| Failure::from(invalid(e.context(format!("reading {}", path.display()))))),
        None => Ok(FleetConfig::default()),
    }
}

async fn run(command: Commands, config: FleetConfig) -> Result<Report, Failure> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            let _ = shutdown_tx.send(true);
        }
    });

    let ctx = Context {
        config,
        shutdown: shutdown_rx,
    };
    match command {
        Commands::Replace(args) => commands::replace::run(&ctx, &args).await,
        Commands::Ensure(args) => commands::group::ensure(&ctx, &args).await,
        Commands::Delete(target) => commands::group::delete(&ctx, &target).await,
        Commands::Show(target) => commands::group::show(&target).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref());
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    if let Err(e) = logging::init(cli.log_format, &logging) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = match config {
        Ok(config) => run(cli.command, config).await,
        Err(failure) => Err(failure),
    };

    match result {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        Err(failure) => {
            error!(kind = failure.kind(), changed = failure.changed, "{}", failure.message());
            println!("{:#}", failure.to_json());
            ExitCode::FAILURE
        }
    }
}
