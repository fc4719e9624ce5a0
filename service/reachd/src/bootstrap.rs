//! Process bootstrap: logging initialisation and CLI dispatch.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::commands::{CheckConfigCommand, Cli, DaemonCommand, DumpCommand, ReachCommand};

/// Entry point invoked by `main.rs`. Initialises logging, then delegates to
/// the selected command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let logging_config = reach_config::Config::from_env()
        .map(|config| config.logging)
        .unwrap_or_default();
    let _logging_guard = reach_logging::init_logging("reachd", &logging_config)?;

    match cli.command {
        ReachCommand::Run { config, demo } => {
            info!("starting broker daemon");
            DaemonCommand::execute(config, demo).await
        }
        ReachCommand::CheckConfig { config } => {
            info!("checking configuration: {}", config.display());
            CheckConfigCommand::execute(config).await
        }
        ReachCommand::Dump { config } => DumpCommand::execute(config).await,
    }
}
