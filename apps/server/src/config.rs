//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use crowdjam_core::{EngineConfig, GatewayConfig, HostDisconnectPolicy};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = first free port in the fallback range).
    /// Override: `CROWDJAM_BIND_PORT`
    pub bind_port: u16,

    /// Token accepted in `X-Admin-Token` for administrative session deletion.
    /// Override: `CROWDJAM_ADMIN_TOKEN`
    pub admin_token: Option<String>,

    /// Origin prefixes allowed by CORS. Empty allows any origin.
    pub trusted_origins: Vec<String>,

    /// Base URL of the Spotify-compatible Web API.
    /// Override: `CROWDJAM_MUSIC_API_URL`
    pub music_api_base_url: String,

    /// Recommendation endpoint; unset disables AI recommendations.
    /// Override: `CROWDJAM_RECOMMENDER_URL`
    pub recommender_url: Option<String>,

    /// Timeout for gateway requests in seconds.
    pub gateway_timeout_secs: u64,

    /// Interval between progress ticks in milliseconds.
    /// Override: `CROWDJAM_TICK_INTERVAL_MS`
    pub tick_interval_ms: u64,

    /// Genre voting window in seconds.
    /// Override: `CROWDJAM_GENRE_WINDOW_SECS`
    pub genre_voting_window_secs: u64,

    /// Length of the song-voting round before the first track, in milliseconds.
    pub song_round_ms: u64,

    /// What happens when the host disconnects.
    pub host_disconnect: HostDisconnectPolicy,

    /// Request recommendations when fewer entries than this are queued at
    /// round start (0 = never).
    pub auto_recommend_below: usize,

    /// Fixed seed for tie breaks.
    pub tie_break_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let gateways = GatewayConfig::default();
        Self {
            bind_port: 49500,
            admin_token: None,
            trusted_origins: Vec::new(),
            music_api_base_url: gateways.music_api_base_url,
            recommender_url: gateways.recommender_url,
            gateway_timeout_secs: gateways.timeout_secs,
            tick_interval_ms: engine.tick_interval_ms,
            genre_voting_window_secs: engine.genre_voting_window_secs,
            song_round_ms: engine.song_round_ms,
            host_disconnect: engine.host_disconnect,
            auto_recommend_below: engine.auto_recommend_below,
            tie_break_seed: engine.tie_break_seed,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `CROWDJAM_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("CROWDJAM_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }
        if let Some(token) = lookup("CROWDJAM_ADMIN_TOKEN").filter(|v| !v.is_empty()) {
            self.admin_token = Some(token);
        }
        if let Some(url) = lookup("CROWDJAM_MUSIC_API_URL").filter(|v| !v.is_empty()) {
            self.music_api_base_url = url;
        }
        if let Some(url) = lookup("CROWDJAM_RECOMMENDER_URL").filter(|v| !v.is_empty()) {
            self.recommender_url = Some(url);
        }
        if let Some(ms) = lookup("CROWDJAM_TICK_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.tick_interval_ms = ms;
        }
        if let Some(secs) = lookup("CROWDJAM_GENRE_WINDOW_SECS").and_then(|v| v.parse().ok()) {
            self.genre_voting_window_secs = secs;
        }
    }

    /// Converts to crowdjam-core's Config type.
    pub fn to_core_config(&self) -> crowdjam_core::Config {
        crowdjam_core::Config {
            preferred_port: self.bind_port,
            admin_token: self.admin_token.clone(),
            trusted_origins: self.trusted_origins.clone(),
            engine: EngineConfig {
                tick_interval_ms: self.tick_interval_ms,
                genre_voting_window_secs: self.genre_voting_window_secs,
                song_round_ms: self.song_round_ms,
                host_disconnect: self.host_disconnect,
                auto_recommend_below: self.auto_recommend_below,
                tie_break_seed: self.tie_break_seed,
                ..Default::default()
            },
            gateways: GatewayConfig {
                music_api_base_url: self.music_api_base_url.clone(),
                recommender_url: self.recommender_url.clone(),
                timeout_secs: self.gateway_timeout_secs,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn yaml_fields_default_when_missing() {
        let config: ServerConfig = serde_yaml::from_str(
            "bind_port: 8080\nhost_disconnect:\n  mode: grace_period\n  secs: 15\n",
        )
        .unwrap();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(
            config.host_disconnect,
            HostDisconnectPolicy::GracePeriod { secs: 15 }
        );
        assert_eq!(config.tick_interval_ms, EngineConfig::default().tick_interval_ms);
    }

    #[test]
    fn environment_overrides_valid_values_only() {
        let env: HashMap<&str, &str> = [
            ("CROWDJAM_BIND_PORT", "not-a-port"),
            ("CROWDJAM_RECOMMENDER_URL", "http://recommender.local/suggest"),
            ("CROWDJAM_GENRE_WINDOW_SECS", "45"),
        ]
        .into_iter()
        .collect();
        let mut config = ServerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind_port, 49500);
        assert_eq!(
            config.recommender_url.as_deref(),
            Some("http://recommender.local/suggest")
        );
        assert_eq!(config.genre_voting_window_secs, 45);
    }

    #[test]
    fn core_config_is_valid_by_default() {
        let core = ServerConfig::default().to_core_config();
        assert!(core.validate().is_ok());
        assert_eq!(core.preferred_port, 49500);
    }
}
