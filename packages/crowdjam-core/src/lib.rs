//! Crowdjam Core - shared library for Crowdjam.
//!
//! Crowdjam runs collaborative listening sessions: participants vote on
//! genres, then suggest and vote on songs in rounds that follow the progress
//! of the host's currently playing track.
//!
//! # Architecture
//!
//! - [`session`]: Session model and the pure round logic (phase clock, vote
//!   ledger, queue, state lifecycle)
//! - [`services`]: Session registry, persistence, per-session timers and the
//!   command-routing engine
//! - [`gateway`]: Music service and recommendation clients
//! - [`events`]: Event system for real-time client communication
//! - [`api`]: HTTP routes and the WebSocket endpoint
//! - [`state`]: Configuration
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`SessionStore`](services::SessionStore): Session persistence
//! - [`MusicServiceGateway`](gateway::MusicServiceGateway) and
//!   [`RecommendationGateway`](gateway::RecommendationGateway): External services

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod gateway;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod session;
pub mod state;
pub mod utils;

pub use error::{CrowdjamError, CrowdjamResult, ErrorCode};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EndReason, EventEmitter, QueueEvent, RoundEvent,
    SessionEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, EngineConfig, GatewayConfig, HostDisconnectPolicy};
pub use utils::now_millis;

pub use gateway::{GatewayError, MusicServiceGateway, RecommendationGateway};
pub use services::{
    CommandOutcome, InMemorySessionStore, SessionCommand, SessionEngine, SessionRegistry,
    SessionStore,
};
pub use session::{Phase, Session, SessionState, Song, SongEntry};

pub use bootstrap::{bootstrap_services, bootstrap_services_with_store, BootstrappedServices};

pub use api::{start_server, AppState, AppStateBuilder, ServerError, WsConnectionManager};
