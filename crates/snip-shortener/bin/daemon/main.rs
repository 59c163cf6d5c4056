mod cli;

use crate::cli::{LogFormatArg, CLI};
use anyhow::Context;
use clap::Parser;
use snip_identity::{IdentityService, IdentitySettings};
use snip_shortener::deletion::{self, PipelineSettings, StorageSink};
use snip_shortener::ShortenerService;
use snip_storage::StorageSettings;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormatArg::Text => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(
        base_url = %config.base_url,
        log_format = %config.log_format,
        file_storage = config.file_storage_path.is_some(),
        user_storage = config.user_storage_path.is_some(),
        database = config.database_dsn.is_some(),
        "starting snip daemon"
    );

    let storage_settings = StorageSettings {
        database_dsn: config.database_dsn,
        file_path: config.file_storage_path,
    };
    let storage = snip_storage::open(&storage_settings)
        .await
        .context("failed to open url storage")?;

    let identity_settings = IdentitySettings {
        secret_key: config.secret_key,
        user_log_path: config.user_storage_path,
        storage_instance_name: storage.instance_name().to_string(),
    };
    let identity =
        Arc::new(IdentityService::open(identity_settings).context("failed to open user storage")?);

    let (queue, pipeline) = deletion::spawn(
        Arc::new(StorageSink(storage.clone())),
        PipelineSettings::default(),
    );
    let service = ShortenerService::new(storage.clone(), identity, queue, &config.base_url)
        .context("invalid base url")?;

    match service.stats().await {
        Ok(stats) => info!(urls = stats.urls, users = stats.users, "storage loaded"),
        Err(err) => warn!(error = %err, "failed to read storage stats"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    // closes the deletion queue; the pipeline flushes what is left and exits
    drop(service);
    if let Err(err) = pipeline.await {
        warn!(error = %err, "deletion pipeline did not finish cleanly");
    }
    storage.stop().await;

    info!("snip daemon stopped");
    Ok(())
}
