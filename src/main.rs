use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};

use mediaflow_proxy::{AppConfig, Logger, MediaflowServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards flush buffered logs and keep sentry alive, hold them until exit
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped...");

    if config.api_password.is_none() {
        warn!("API_PASSWORD is not set, anyone can use this proxy");
    }

    MediaflowServer::serve(config)
        .await
        .context("server failed to start")?;

    Ok(())
}
