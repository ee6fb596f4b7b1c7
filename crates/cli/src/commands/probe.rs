// Probe command - start one host and check the handshake

use anyhow::{Context, Result};
use chatvoice_speech::{HostCommandConfig, SpeechPoolConfig};

use super::build_pool;
use crate::output::{print_field, OutputFormat};

pub async fn run(
    pool_config: SpeechPoolConfig,
    host_config: HostCommandConfig,
    output: OutputFormat,
) -> Result<()> {
    let program = host_config.program.clone();
    let pool = build_pool(pool_config, host_config)?;

    let snapshot = pool.ensure_worker().await.map(|worker| worker.snapshot());
    pool.shutdown().await;

    let snapshot =
        snapshot.with_context(|| format!("Speech host {} failed the handshake", program))?;

    if output.is_text() {
        print_field("Host", &program);
        print_field("Worker", &snapshot.id.to_string());
        print_field("Port", &snapshot.port.to_string());
        print_field("State", &snapshot.state.to_string());
        print_field("Started", &snapshot.created_at.to_rfc3339());
    } else {
        output.print_value(&snapshot)?;
    }

    Ok(())
}
