/*!
 * Daemon command implementation
 *
 * Starts the broker against the wired platform and runs until a shutdown
 * signal arrives. The transport adapters that feed real platform events
 * into the broker live outside this crate; `--demo` wires the in-process
 * demo platform instead so the daemon is exercisable standalone.
 */

use anyhow::{Context, Result};
use reach_config::{Config, JsonFileSettings, SettingsStore};
use reach_protocol::AccountId;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::broker::{Broker, PlatformDeps, SettingsFactory};
use crate::testing::TestPlatform;

pub struct DaemonCommand;

impl DaemonCommand {
    pub async fn execute(config_path: Option<PathBuf>, demo: bool) -> Result<()> {
        let config = load_config(config_path)?;
        info!(demo, "starting reach broker");

        let deps = if demo {
            TestPlatform::new().deps()
        } else {
            platform_deps(&config)
        };

        let broker = Broker::start(config, deps).await;
        info!("broker ready");

        tokio::signal::ctrl_c().await.context("failed to wait for shutdown signal")?;
        info!("shutdown signal received");
        drop(broker);
        Ok(())
    }
}

pub(crate) fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::from_env().context("failed to load config from environment"),
    }
}

/// Production wiring: file-backed settings, demo fakes for the transports
/// until platform adapters are linked in.
fn platform_deps(config: &Config) -> PlatformDeps {
    let settings_dir = config.broker.settings_dir.clone();
    let settings: SettingsFactory = Box::new(move |account_id: AccountId| {
        let path = settings_dir.join(format!("{account_id}.json"));
        match JsonFileSettings::open(&path) {
            Ok(store) => store as Arc<dyn SettingsStore>,
            Err(err) => {
                tracing::warn!(account = account_id, error = %err, "settings file unusable, using in-memory store");
                reach_config::MemorySettings::new() as Arc<dyn SettingsStore>
            }
        }
    });

    let platform = TestPlatform::new();
    PlatformDeps {
        host: platform.host.clone(),
        packages: platform.packages.clone(),
        windows: platform.windows.clone(),
        input: platform.input.clone(),
        settings,
    }
}
