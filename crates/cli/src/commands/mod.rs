// CLI commands

pub mod probe;
pub mod speak;

use std::sync::Arc;

use anyhow::{Context, Result};
use chatvoice_speech::{HostCommandConfig, ProcessLauncher, SpeechPool, SpeechPoolConfig};

/// Build a pool that spawns `host` for every worker
pub fn build_pool(config: SpeechPoolConfig, host: HostCommandConfig) -> Result<SpeechPool> {
    tracing::debug!(program = %host.program, args = ?host.args, "Using speech host command");
    let launcher = Arc::new(ProcessLauncher::new(host));
    SpeechPool::new(config, launcher).context("Invalid speech pool configuration")
}
