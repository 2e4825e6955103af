//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! store, registry, gateways, event bridge and engine are instantiated and
//! wired together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, WsConnectionManager};
use crate::error::{CrowdjamError, CrowdjamResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::gateway::{
    HostTokenStore, HttpRecommendationGateway, MusicServiceGateway, NoopRecommendationGateway,
    RecommendationGateway, SpotifyGateway,
};
use crate::runtime::TokioSpawner;
use crate::services::{InMemorySessionStore, SessionEngine, SessionRegistry, SessionStore};
use crate::state::Config;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Routes commands and drives the voting rounds.
    pub engine: Arc<SessionEngine>,
    /// Event bridge feeding WebSocket connections.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Hosts' music-service access tokens.
    pub tokens: Arc<HostTokenStore>,
    /// Configuration shared with the API layer.
    pub config: Arc<RwLock<Config>>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Parent of every session's timers.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Builds the API state from the wired services.
    pub fn app_state(&self) -> AppState {
        AppState {
            engine: Arc::clone(&self.engine),
            event_bridge: Arc::clone(&self.event_bridge),
            ws_manager: Arc::clone(&self.ws_manager),
            tokens: Arc::clone(&self.tokens),
            config: Arc::clone(&self.config),
        }
    }

    /// Initiates graceful shutdown: ends every session, then stops all timers.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        let sessions = self.engine.registry().len();
        self.engine.shutdown().await;
        log::info!("[Bootstrap] Ended {} session(s)", sessions);

        self.cancel_token.cancel();

        let closed = self.ws_manager.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", closed);
        }
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for both gateways.
fn create_http_client(timeout_secs: u64) -> CrowdjamResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CrowdjamError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all services with the in-memory session store.
pub fn bootstrap_services(config: &Config) -> CrowdjamResult<BootstrappedServices> {
    bootstrap_services_with_store(config, Arc::new(InMemorySessionStore::new()))
}

/// Bootstraps all services on top of the given session store.
///
/// Wiring order:
///
/// 1. Shared infrastructure (HTTP client, event bridge, cancellation token)
/// 2. Gateways (music service with the token store, recommender if configured)
/// 3. Registry (store, cancellation token, spawner)
/// 4. Engine (registry, gateways, event bridge)
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the HTTP client
/// cannot be built.
pub fn bootstrap_services_with_store(
    config: &Config,
    store: Arc<dyn SessionStore>,
) -> CrowdjamResult<BootstrappedServices> {
    config.validate().map_err(CrowdjamError::Configuration)?;

    let spawner = TokioSpawner::current();
    let http_client = create_http_client(config.gateways.timeout_secs)?;
    let cancel_token = CancellationToken::new();

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));
    let ws_manager = Arc::new(WsConnectionManager::new());

    let tokens = Arc::new(HostTokenStore::new());
    let music: Arc<dyn MusicServiceGateway> = Arc::new(SpotifyGateway::new(
        http_client.clone(),
        config.gateways.music_api_base_url.clone(),
        Arc::clone(&tokens),
    ));
    let recommender: Arc<dyn RecommendationGateway> = match &config.gateways.recommender_url {
        Some(url) => {
            log::info!("[Bootstrap] Recommendations from {}", url);
            Arc::new(HttpRecommendationGateway::new(http_client, url.clone()))
        }
        None => {
            log::info!("[Bootstrap] No recommender configured");
            Arc::new(NoopRecommendationGateway)
        }
    };

    let registry = Arc::new(SessionRegistry::new(
        store,
        cancel_token.clone(),
        spawner.clone(),
    ));
    let engine = Arc::new(SessionEngine::new(
        registry,
        music,
        recommender,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.engine.clone(),
    ));

    Ok(BootstrappedServices {
        engine,
        event_bridge,
        ws_manager,
        tokens,
        config: Arc::new(RwLock::new(config.clone())),
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_has_timeout() {
        let client = create_http_client(5).unwrap();
        assert!(client.get("http://example.com").build().is_ok());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.engine.tick_interval_ms = 0;
        let err = bootstrap_services(&config).err().unwrap();
        assert_eq!(err.code(), "configuration_error");
    }

    #[tokio::test]
    async fn shutdown_ends_sessions_and_cancels_timers() {
        let services = bootstrap_services(&Config::default()).unwrap();
        services
            .engine
            .create_session(Some("ABCD".into()), "host", "Host")
            .await
            .unwrap();
        let mut rx = services.event_bridge.subscribe();

        services.shutdown().await;

        assert!(services.engine.registry().is_empty());
        assert!(services.cancel_token.is_cancelled());
        let event = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["reason"], "shutdown");
    }
}
