use anyhow::Result;
use common::{Ctx, Level, LogProvider, jsonlogs::JsonLogger, log_body};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use venues_api::{
    app,
    config::{AppConfig, startup_log_level},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();
    let log_level = startup_log_level(&config).to_string();

    // Diagnostics go to stderr; stdout carries the application log.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::parse(&log_level).as_filter()));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let logger: Arc<dyn LogProvider> = Arc::new(JsonLogger::new(&log_level));
    let ctx = Ctx::background();

    let config = match config {
        Ok(config) => config,
        Err(err) => logger.fatal(
            &ctx,
            "invalid-configuration",
            &[log_body! { "error" => err.to_string() }],
        ),
    };

    if let Err(err) = app::start_api(config, logger.clone(), shutdown_signal()).await {
        logger.error(
            &ctx,
            "server-stopped-with-an-error",
            &[log_body! { "error" => format!("{err:#}") }],
        );
        return Err(err);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("could not listen for the shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
