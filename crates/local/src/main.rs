//! Binary to launch a service composition locally.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

use error::{Error, Result};

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use convoy_orchestrator::{Orchestrator, OrchestratorConfig, StartupReport};
use convoy_runtime::ProcessRuntime;
use convoy_topology::{EnvironmentBlock, select_topology};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version, about = "Launches a Convoy service composition", long_about = None)]
struct Args {
    /// Environment name used to select a definition block
    #[arg(long, env = "CONVOY_ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Path to the JSON service definition file
    #[arg(long, default_value = "convoy.json")]
    definitions: PathBuf,

    /// Seconds a dependent may wait for its wait-for predecessors
    #[arg(long, default_value_t = 60)]
    startup_timeout_secs: u64,

    /// Services whose failure aborts the whole composition
    #[arg(long = "fatal", value_delimiter = ',')]
    fatal: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing() {
        eprintln!("{e}");
        return ExitCode::from(2);
    }

    match run(args).await {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(report) => {
            for (name, state) in report.outstanding() {
                error!(service = %name, "{state}");
            }
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .finish(),
    )?;

    Ok(())
}

async fn run(args: Args) -> Result<StartupReport> {
    info!("loading definitions from {:?}", args.definitions);
    let raw = std::fs::read_to_string(&args.definitions).map_err(|e| {
        Error::Io(format!(
            "failed to read {}: {e}",
            args.definitions.display()
        ))
    })?;
    let blocks: Vec<EnvironmentBlock> = serde_json::from_str(&raw)?;

    let topology = select_topology(&blocks, &args.environment)?;
    info!(
        environment = %args.environment,
        services = topology.len(),
        "selected topology"
    );

    let config = OrchestratorConfig {
        startup_timeout: Duration::from_secs(args.startup_timeout_secs),
        fatal_services: args.fatal.into_iter().collect::<HashSet<_>>(),
    };
    let orchestrator = Orchestrator::new(topology, ProcessRuntime::new()?, config)?;

    let token = orchestrator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            token.cancel();
        }
    });

    let report = orchestrator.run().await?;
    info!("composition finished:\n{report}");

    Ok(report)
}
