//! CLI commands for the reachd binary.

pub mod check_config;
pub mod cli;
pub mod daemon;
pub mod dump;

pub use check_config::CheckConfigCommand;
pub use cli::{Cli, ReachCommand};
pub use daemon::DaemonCommand;
pub use dump::DumpCommand;
