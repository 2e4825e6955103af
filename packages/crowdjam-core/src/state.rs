//! Core configuration types.
//!
//! [`Config`] holds everything the core needs at bootstrap. The standalone
//! server builds it from its YAML file and environment overrides.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    EVENT_CHANNEL_CAPACITY, GATEWAY_TIMEOUT_SECS, LOCK_WINDOW_MS, MAX_GENRES_PER_BALLOT,
    WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS,
};

/// What happens to a session when its host's connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostDisconnectPolicy {
    /// The session ends as soon as the host disconnects.
    #[default]
    EndImmediately,
    /// The session ends if the host has not re-joined within `secs`.
    GracePeriod { secs: u64 },
    /// Host presence is tracked but never ends the session.
    Ignore,
}

/// Configuration for the session phase engine.
///
/// Groups the timing and quota parameters of the voting rounds.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between progress ticks for each session (milliseconds).
    pub tick_interval_ms: u64,

    /// Length of the genre voting window before it closes on its own (seconds).
    pub genre_voting_window_secs: u64,

    /// Genre votes each participant is expected to cast; the genre vote closes
    /// early once `participants * genre_votes_per_participant` votes are in.
    pub genre_votes_per_participant: usize,

    /// Length of a song-voting round before the first track plays (milliseconds).
    ///
    /// There is no playback yet in SONG_VOTING, so the round runs against a
    /// synthetic track of this length.
    pub song_round_ms: u64,

    /// Host disconnect handling.
    pub host_disconnect: HostDisconnectPolicy,

    /// Request AI recommendations when a round starts with fewer queued
    /// entries than this. 0 disables automatic requests.
    pub auto_recommend_below: usize,

    /// Seed for the tie-break random source. `None` seeds from entropy.
    pub tie_break_seed: Option<u64>,
}

impl EngineConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be >= 1".to_string());
        }
        if self.genre_voting_window_secs == 0 {
            return Err("genre_voting_window_secs must be >= 1".to_string());
        }
        if self.genre_votes_per_participant == 0
            || self.genre_votes_per_participant > MAX_GENRES_PER_BALLOT
        {
            return Err(format!(
                "genre_votes_per_participant must be between 1 and {}",
                MAX_GENRES_PER_BALLOT
            ));
        }
        if self.song_round_ms <= LOCK_WINDOW_MS * 2 {
            return Err(format!(
                "song_round_ms must be greater than {} so every phase has room",
                LOCK_WINDOW_MS * 2
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            genre_voting_window_secs: 30,
            genre_votes_per_participant: MAX_GENRES_PER_BALLOT,
            song_round_ms: 90_000,
            host_disconnect: HostDisconnectPolicy::default(),
            auto_recommend_below: 0,
            tie_break_seed: None,
        }
    }
}

/// Configuration for the external service gateways.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the Spotify-compatible Web API.
    pub music_api_base_url: String,

    /// Recommendation endpoint. `None` disables AI recommendations.
    pub recommender_url: Option<String>,

    /// Timeout for gateway HTTP requests (seconds).
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            music_api_base_url: "https://api.spotify.com/v1".to_string(),
            recommender_url: None,
            timeout_secs: GATEWAY_TIMEOUT_SECS,
        }
    }
}

/// Configuration for the Crowdjam application.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    /// Token required for administrative session deletion. `None` disables it.
    pub admin_token: Option<String>,

    /// Origin prefixes allowed by CORS. Empty allows any origin.
    pub trusted_origins: Vec<String>,

    // Engine
    /// Voting round configuration.
    pub engine: EngineConfig,

    // Gateways
    /// External service configuration.
    pub gateways: GatewayConfig,

    // WebSocket
    /// WebSocket heartbeat timeout (seconds).
    pub ws_heartbeat_timeout_secs: u64,

    /// Interval between WebSocket heartbeat checks (seconds).
    pub ws_heartbeat_check_interval_secs: u64,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        self.engine.validate()?;
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.ws_heartbeat_check_interval_secs == 0 {
            return Err("ws_heartbeat_check_interval_secs must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            admin_token: None,
            trusted_origins: Vec::new(),
            engine: EngineConfig::default(),
            gateways: GatewayConfig::default(),
            ws_heartbeat_timeout_secs: WS_HEARTBEAT_TIMEOUT_SECS,
            ws_heartbeat_check_interval_secs: WS_HEARTBEAT_CHECK_INTERVAL_SECS,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.genre_votes_per_participant, 3);
    }

    #[test]
    fn engine_config_rejects_degenerate_values() {
        let config = EngineConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            genre_votes_per_participant: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            song_round_ms: 15_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_zero_channel_capacity() {
        let config = Config {
            event_channel_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn host_disconnect_policy_deserializes_from_tagged_yaml_shape() {
        let policy: HostDisconnectPolicy =
            serde_json::from_str(r#"{"mode":"grace_period","secs":20}"#).unwrap();
        assert_eq!(policy, HostDisconnectPolicy::GracePeriod { secs: 20 });

        let policy: HostDisconnectPolicy = serde_json::from_str(r#"{"mode":"ignore"}"#).unwrap();
        assert_eq!(policy, HostDisconnectPolicy::Ignore);
    }
}
