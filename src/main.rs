mod config;
mod consumer;
mod device;
mod orchestrator;
mod reading;
mod report;
mod source;
mod stats;
mod transport;

use crate::config::Config;
use crate::report::Reporter;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,appliance_tracker=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let reporter = Reporter::new(config.report_every);
    let summary = orchestrator::run(&config, cancel, &reporter).await?;
    reporter.run_summary(&summary);

    Ok(())
}
