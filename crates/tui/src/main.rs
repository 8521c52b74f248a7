mod app;
mod cities;

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    sync::{Arc, Mutex},
};

use resync_core::{
    config::{self, AppConfig},
    CrudCoordinator, HierarchicalUrl, HttpTransport,
};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::cities::CityService;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    config::ensure_default_config()?;
    let config = AppConfig::load()?;
    let sort = config.sort_descriptors()?;

    let region = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("region must be a number, got {arg:?}"))?,
        None => 1,
    };
    info!(base = %config.api_base_url, region, "starting");

    let transport = HttpTransport::from_config(&config)?;
    let resolver = HierarchicalUrl::new(config.api_base_url.clone());
    let crud = CrudCoordinator::with_new_cache(Arc::new(transport), Arc::new(resolver));

    let mut app = app::CitiesApp::new(CityService::new(crud), region, sort);
    app.run().await
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("resync.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the screen, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
