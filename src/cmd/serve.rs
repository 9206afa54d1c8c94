//! Engine protocol server: `fcip serve`.

use anyhow::Result;
use tokio::io::BufReader;
use tracing::info;

use fcip::Orchestrator;
use fcip::fcip_config::FcipConfig;

pub async fn cmd_serve(config: &FcipConfig) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config.toml)?;
    info!(
        engines = orchestrator.registry().len(),
        backend = %config.toml.storage.backend,
        "Serving engine requests on stdin"
    );
    let stats = orchestrator
        .dispatcher()
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    info!(
        requests = stats.requests,
        failures = stats.failures,
        "Input closed; engine server stopped"
    );
    Ok(())
}
