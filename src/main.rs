use std::net::SocketAddr;
use std::sync::Arc;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{BoxError, Router};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dto;
mod error;
mod extract;
mod fingerprint;
#[cfg(test)]
mod integration_tests;
mod liveness;
mod model;
mod persistence;
mod resolver;
mod routes;
mod state;
mod trace;
mod validation;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcp_mesh_registry=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let bind_addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    let request_deadline = config.request_deadline;
    let shutdown_grace = config.shutdown_grace;

    let state = Arc::new(AppState::new(config).await?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper_state = state.clone();
    let sweeper_handle = tokio::spawn(async move {
        liveness::run(sweeper_state, shutdown_rx).await;
    });

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    // SSE streams are routed separately, outside the per-request deadline —
    // §5 exempts them from it while every other handler is bounded.
    let deadline = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|_: BoxError| async { StatusCode::REQUEST_TIMEOUT }))
        .timeout(request_deadline);

    let bounded = Router::new()
        .route("/health", get(routes::health::health).head(routes::health::health_head))
        .route("/", get(routes::health::root))
        .route("/heartbeat", post(routes::heartbeat::heartbeat))
        .route("/heartbeat/:agent_id", axum::routing::head(routes::heartbeat::heartbeat_head))
        .route("/agents", get(routes::agents::list_agents))
        .route("/agents/:agent_id", axum::routing::delete(routes::agents::unregister))
        .layer(deadline);

    let app = Router::new()
        .merge(bounded)
        .route("/traces/:trace_id/stream", get(routes::traces::stream))
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!(%bind_addr, "mcp-mesh-registry listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(shutdown_grace, sweeper_handle).await.is_err() {
        tracing::warn!("sweeper did not drain within the shutdown grace window");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
