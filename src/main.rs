use anyhow::{Context, Result};
use std::sync::Arc;
use stream_uplink::{
    application::usecases::{
        agent_bridge::RECOVERY_TAG, agent_host::AgentHost, chunked_upload::ChunkedUploadDriver,
    },
    config::config_loader,
    domain::repositories::upload_records::UploadRecordRepository,
    infrastructure::{
        axum_http::http_serve,
        http::upload_transport::HttpUploadTransport,
        sqlite::repositories::upload_records::{UploadRecordSqlite, purge_older_than},
    },
    observability,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("uplink-agent exited with error: {error:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init_observability("uplink-agent")?;

    let config = Arc::new(config_loader::load()?);
    info!("ENV has been loaded");

    let store: Arc<dyn UploadRecordRepository + Send + Sync> = Arc::new(
        UploadRecordSqlite::open(&config.store.path)
            .context("failed to open the upload record store")?
            .with_segment_bytes(config.store.segment_bytes),
    );

    match purge_older_than(store.as_ref(), config.store.purge_max_age).await {
        Ok(purged) => info!(purged, "startup purge finished"),
        Err(err) => warn!(error = %err, "startup purge failed"),
    }

    let transport = Arc::new(HttpUploadTransport::new(
        config.upload.request_timeout,
        config.upload.whole_request_timeout,
    )?);
    let driver = Arc::new(ChunkedUploadDriver::new(transport, config.upload.clone()));
    let host = AgentHost::new(Arc::clone(&store), driver, config.agent.clone());

    let mut agent_state = host.register();
    host.register_recovery(RECOVERY_TAG);
    tokio::spawn(async move {
        while agent_state.changed().await.is_ok() {
            let state = *agent_state.borrow_and_update();
            info!(state = %state, "delivery agent state changed");
        }
    });

    http_serve::start(config, host, store).await
}
