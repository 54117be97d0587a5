//! Server bootstrap: open the store, assemble the router, bind, and serve
//! until a shutdown signal arrives.

use std::net::SocketAddr;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::errors::BoardError;

use super::api::{self, AppState};
use super::db::{BoardDb, DbHandle};
use super::feed::FeedConfig;

/// Open (creating directories and schema as needed) the database named by
/// the config and wrap it in the shared application state.
pub fn build_state(config: &ServerConfig) -> Result<AppState, BoardError> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BoardError::Internal(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
    }
    let db = BoardDb::new(&config.db_path)?;
    Ok(AppState {
        db: DbHandle::new(db),
        feed: FeedConfig::from(config),
    })
}

pub fn build_router(state: AppState, dev_mode: bool) -> Router {
    let router = api::api_router(state);
    if dev_mode {
        // dashboards served from another origin during development
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

pub async fn start_server(config: ServerConfig) -> Result<(), BoardError> {
    let state = build_state(&config)?;
    let router = build_router(state, config.dev_mode);

    let host = if config.dev_mode {
        [0, 0, 0, 0]
    } else {
        [127, 0, 0, 1]
    };
    let addr = SocketAddr::from((host, config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BoardError::Internal(format!("Cannot bind {}: {}", addr, e)))?;

    tracing::info!("Board server listening on http://{}", addr);
    tracing::info!("Change feed at http://{}/api/events?project_id=<id>", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BoardError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Board server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
