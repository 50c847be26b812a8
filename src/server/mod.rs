//! Query service server
//!
//! This module provides the axum server that answers pool queries from the
//! currently published snapshot.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{Config, SelectorConfig};
use crate::error::Error;
use crate::snapshot::SnapshotSlot;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Slot holding the most recently published snapshot
    pub slot: Arc<SnapshotSlot>,

    /// Selector thresholds
    pub selector: SelectorConfig,

    /// Server start time
    pub started: Instant,
}

/// Main query service server
pub struct PoolServer {
    bind_addr: SocketAddr,
    state: AppState,
}

impl PoolServer {
    /// Create a new server over the given snapshot slot
    pub fn new(config: &Config, slot: Arc<SnapshotSlot>) -> Result<Self, Error> {
        let bind_addr = config
            .server
            .bind_addr
            .parse()
            .map_err(|_| Error::Config(format!("invalid bind_addr: {}", config.server.bind_addr)))?;

        Ok(Self {
            bind_addr,
            state: AppState {
                slot,
                selector: config.selector.clone(),
                started: Instant::now(),
            },
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router for the given state
    pub fn router(state: AppState) -> Router {
        api::create_router(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any))
    }

    /// Bind and serve until interrupted
    pub async fn run(self) -> Result<(), Error> {
        let app = Self::router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "query service listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
