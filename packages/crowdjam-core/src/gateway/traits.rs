//! Trait abstractions for the external services.
//!
//! The engine depends on these traits rather than on concrete HTTP clients,
//! so tests drive it with scripted gateways.

use async_trait::async_trait;
use serde::Serialize;

use super::GatewayResult;
use crate::session::{PlaybackProgress, RankedCandidate, Song};

/// Access to the host's music service account.
#[async_trait]
pub trait MusicServiceGateway: Send + Sync {
    /// Reads the host player's current position.
    ///
    /// Returns `None` when nothing is loaded in the player.
    ///
    /// # Arguments
    /// * `host_id` - Host whose access token authorizes the call
    async fn playback_progress(&self, host_id: &str) -> GatewayResult<Option<PlaybackProgress>>;

    /// Appends a track to the host player's own queue so it plays next.
    ///
    /// # Arguments
    /// * `host_id` - Host whose access token authorizes the call
    /// * `uri` - Track URI, e.g. `spotify:track:...`
    async fn enqueue_track(&self, host_id: &str, uri: &str) -> GatewayResult<()>;

    /// Searches the catalog for tracks.
    async fn search(&self, host_id: &str, query: &str) -> GatewayResult<Vec<Song>>;
}

/// Context sent to the recommender.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub session_id: String,
    pub top_genres: Vec<String>,
    pub recent_tracks: Vec<Song>,
}

/// Source of AI song recommendations.
#[async_trait]
pub trait RecommendationGateway: Send + Sync {
    /// Returns candidates with confidence scores, best first.
    async fn suggest(&self, request: &RecommendationRequest)
        -> GatewayResult<Vec<RankedCandidate>>;
}
