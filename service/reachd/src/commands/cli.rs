use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI definition for the reachd binary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "reachd")]
pub struct Cli {
    #[command(subcommand)]
    pub command: ReachCommand,
}

/// Supported subcommands for the reachd binary.
#[derive(Subcommand, Debug)]
pub enum ReachCommand {
    /// Run the broker daemon
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Run against the in-process demo platform (no transport)
        #[arg(long)]
        demo: bool,
    },
    /// Check configuration and exit
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print a read-only dump of broker registries and exit
    Dump {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
