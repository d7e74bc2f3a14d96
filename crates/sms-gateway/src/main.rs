mod app;
mod args;
mod config;
mod core;
mod http;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;

use app::AppState;
use args::GatewayArgs;
use config::Config;
use core::{DeviceManager, History};
use http::SessionStore;
use sms_helpers::{logging, shutdown};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = GatewayArgs::parse(std::env::args().skip(1))?;
    let config = Config::load(&args.config_path)
        .context("failed to load configuration")?;

    let log_file = config
        .log
        .log_to_file
        .then(|| config.log.file_path.as_path());
    let default_filter = if config.prod {
        "sms_gateway=info,tokio=warn"
    } else {
        "sms_gateway=debug,tokio=warn"
    };
    logging::init_logging(default_filter, "SMS_LOG", "sms-gateway", log_file);

    if args.init_database {
        History::create_database(&config.database.path).await?;
        info!(
            "database created: path={}",
            config.database.path.display()
        );
        return Ok(());
    }

    if !config.database.path.exists() {
        bail!(
            "missing database {} (run with -i to create it)",
            config.database.path.display()
        );
    }

    let history = Arc::new(
        History::connect(&config.database.path)
            .await
            .context("failed to open history database")?,
    );
    let manager = Arc::new(DeviceManager::new(
        &config.devices,
        history.clone(),
        config.webhook.clone(),
        config.continue_on_start_failure,
    )?);

    manager.start_all().context("failed to start serial devices")?;
    info!(
        "gateway starting: brand={}, devices={}, listen={}",
        config.brand_name,
        config.devices.len(),
        config.bind_addr()
    );

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown::listen_shutdown(shutdown_token.clone()));

    let config = Arc::new(config);
    let state = AppState {
        sessions: Arc::new(SessionStore::new(config.session.clone())),
        config: config.clone(),
        manager: manager.clone(),
        history: history.clone(),
        shutdown: shutdown_token.clone(),
    };

    http::serve(&config, state).await?;

    info!("shutting down: stopping serial devices");
    manager.stop_all();
    history.close().await;
    info!("gateway stopped");
    Ok(())
}
