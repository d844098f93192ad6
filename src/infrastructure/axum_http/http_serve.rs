use crate::{
    application::usecases::agent_host::AgentHost,
    config::config_model::UplinkConfig,
    domain::repositories::upload_records::UploadRecordRepository,
    infrastructure::axum_http::{default_routers, routers},
};
use anyhow::Result;
use axum::{Router, routing::get};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

pub fn router(
    config: Arc<UplinkConfig>,
    host: AgentHost,
    store: Arc<dyn UploadRecordRepository + Send + Sync>,
) -> Result<Router> {
    let server = &config.agent_server;
    let body_limit = usize::try_from(server.body_limit_mb * 1024 * 1024)?;

    Ok(Router::new()
        .fallback(default_routers::not_found)
        .nest("/internal/agent", routers::agent_commands::routes(host))
        .nest(
            "/internal/v1/purge",
            routers::purge_records::routes(Arc::clone(&config), store),
        )
        .route("/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(server.timeout_secs)))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http()))
}

pub async fn start(
    config: Arc<UplinkConfig>,
    host: AgentHost,
    store: Arc<dyn UploadRecordRepository + Send + Sync>,
) -> Result<()> {
    let port = config.agent_server.port;
    let app = router(config, host, store)?;

    // Internal surface, loopback only.
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "agent http: listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("agent http: stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "agent http: failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "agent http: failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("agent http: received Ctrl+C"),
        _ = terminate => info!("agent http: received terminate signal"),
    }
}
