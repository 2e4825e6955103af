//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the session engine.
//! It provides the router construction and server startup functionality.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::events::BroadcastEventBridge;
use crate::gateway::HostTokenStore;
use crate::services::SessionEngine;
use crate::state::Config;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Ports tried when no preferred port is configured.
const FALLBACK_PORTS: (u16, u16) = (49500, 49510);

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// A required piece of state was not supplied to the builder.
    #[error("Missing application state: {0}")]
    MissingState(&'static str),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// Routes commands and drives the voting rounds.
    pub engine: Arc<SessionEngine>,
    /// Source of the broadcast events WebSocket connections subscribe to.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Hosts' music-service access tokens.
    pub tokens: Arc<HostTokenStore>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    engine: Option<Arc<SessionEngine>>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    tokens: Option<Arc<HostTokenStore>>,
    config: Option<Arc<RwLock<Config>>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: Arc<SessionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    pub fn tokens(mut self, tokens: Arc<HostTokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn config(mut self, config: Arc<RwLock<Config>>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`.
    ///
    /// The connection manager and configuration fall back to defaults; the
    /// engine, event bridge and token store are required.
    pub fn build(self) -> Result<AppState, ServerError> {
        Ok(AppState {
            engine: self.engine.ok_or(ServerError::MissingState("engine"))?,
            event_bridge: self
                .event_bridge
                .ok_or(ServerError::MissingState("event_bridge"))?,
            ws_manager: self.ws_manager.unwrap_or_default(),
            tokens: self.tokens.ok_or(ServerError::MissingState("tokens"))?,
            config: self.config.unwrap_or_default(),
        })
    }
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
///
/// Runs until `shutdown` resolves, then closes every WebSocket connection
/// and drains in-flight requests.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let preferred_port = state.config.read().preferred_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(FALLBACK_PORTS.0, FALLBACK_PORTS.1).await?
    };

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let ws_manager = Arc::clone(&state.ws_manager);
    let app = http::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        ws_manager.close_all();
    })
    .await?;
    Ok(())
}
