//! movies-etl daemon
//!
//! Reads configuration from the environment (and `.env` when present), then
//! runs the sync loop until a permanent error or a termination signal.
//! Interrupting mid-batch is safe: the checkpoint only moves after a
//! confirmed write.

use std::sync::Arc;

use anyhow::Context;
use movies_etl::{ElasticIndexWriter, LogFormat, PostgresExtractor, Settings, SyncLoop, SyncOptions};
use movies_state::JsonFileStateStore;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::from_env().context("invalid configuration")?;
    init_tracing(settings.log_format);

    info!(
        db_host = %settings.postgres.host,
        db_name = %settings.postgres.db_name,
        es_address = %settings.elastic.address,
        index = %settings.elastic.index,
        batch_size = settings.etl.batch_size,
        storage = %settings.etl.storage_path.display(),
        "starting movies-etl"
    );

    let extractor = Arc::new(PostgresExtractor::new(&settings.postgres));
    let writer = Arc::new(ElasticIndexWriter::new(&settings.elastic).context("failed to build index client")?);
    let store = Arc::new(JsonFileStateStore::new(&settings.etl.storage_path).context("invalid STORAGE_PATH")?);

    let mut sync = SyncLoop::new(extractor, writer, store, SyncOptions::from_settings(&settings.etl));

    tokio::select! {
        result = sync.run() => {
            if let Err(err) = &result {
                error!(error = %err, category = %err.category(), "sync loop stopped");
            }
            result.context("sync loop failed")
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown requested, exiting");
            Ok(())
        }
    }
}
