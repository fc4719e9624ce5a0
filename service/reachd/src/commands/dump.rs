/*!
 * Dump command
 *
 * Builds a broker against the configured platform and prints the read-only
 * registry dump. With no transport attached this reflects the freshly
 * initialised state; the command exists so operators have one invocation
 * path for the dump surface.
 */

use anyhow::Result;
use std::path::PathBuf;

use super::daemon::load_config;
use crate::broker::Broker;
use crate::testing::TestPlatform;

pub struct DumpCommand;

impl DumpCommand {
    pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
        let config = load_config(config_path)?;
        let broker = Broker::start(config, TestPlatform::new().deps()).await;
        println!("{}", broker.dump_text().await);
        Ok(())
    }
}
