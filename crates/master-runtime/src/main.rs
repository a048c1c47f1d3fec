//! # Fleet Master
//!
//! The master process: authenticates minions, hands out session keys,
//! publishes jobs and stores their returns.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, `FM_CONFIG` file, `FM_*` environment)
//! 2. Initialize logging at `log_level`
//! 3. Validate for production
//! 4. Open the key store and job cache (level 1), wire services (level 2)
//! 5. Start maintenance handlers and the listener
//! 6. Run until Ctrl+C, then shut down gracefully

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use master_runtime::{MasterConfig, MasterContainer, MasterRuntime};

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level {level:?}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to install log subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = MasterConfig::load().context("Failed to load configuration")?;
    init_logging(&config.log_level)?;

    config
        .validate_for_production()
        .context("Configuration rejected")?;

    let container = MasterContainer::open(config).context("Failed to open master stores")?;
    let mut runtime = MasterRuntime::new(container);
    runtime.start().await.context("Failed to start listener")?;

    info!("Master is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
