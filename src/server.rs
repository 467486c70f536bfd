use std::net::SocketAddr;

use anyhow::Context;
use axum::{routing::get, Router};
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{health, rooms, AppState, ChatConfig};

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .merge(rooms::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serves until ctrl-c.
pub async fn serve(config: ChatConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %listener.local_addr()?, "chat server listening");

    axum::serve(listener, app(AppState::new(config)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

/// Binds `config.bind` (port 0 picks a free one) and serves in the background.
pub async fn spawn(config: ChatConfig) -> anyhow::Result<(SocketAddr, AppState, JoinHandle<()>)> {
    let listener = TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    let state = AppState::new(config);
    let router = app(state.clone());

    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!(error = %err, "chat server stopped");
        }
    });
    info!(%addr, "chat server listening");
    Ok((addr, state, handle))
}
