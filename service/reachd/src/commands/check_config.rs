/*!
 * Configuration check command
 *
 * Loads and validates the configuration, printing the effective values.
 */

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use super::daemon::load_config;

pub struct CheckConfigCommand;

impl CheckConfigCommand {
    pub async fn execute(config_path: PathBuf) -> Result<()> {
        let config = load_config(Some(config_path))?;
        info!("configuration is valid");
        println!("channel timeout:   {} ms", config.broker.channel_timeout_ms);
        println!("tree id capacity:  {}", config.broker.tree_id_capacity);
        println!("settings dir:      {}", config.broker.settings_dir.display());
        println!("initial account:   {}", config.broker.initial_account);
        println!("log level:         {}", config.logging.level);
        Ok(())
    }
}
