//! Recommendation gateways.
//!
//! [`HttpRecommendationGateway`] posts the session's taste profile to an
//! external recommender and scores what comes back. When the recommender
//! does not supply a confidence, one is derived from the track's popularity
//! and whether the session already heard it.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::traits::{RecommendationGateway, RecommendationRequest};
use super::{GatewayError, GatewayResult};
use crate::session::{RankedCandidate, Song};

/// A track as returned by the recommender.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedTrack {
    #[serde(flatten)]
    song: Song,
    #[serde(default)]
    popularity: Option<u32>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Confidence for a recommended track (0..=100).
///
/// 30% of the track's popularity, 20 points when the session has not heard
/// it yet, plus a base of 50 for having been picked at all.
pub fn score_candidate(song: &Song, popularity: u32, recent_tracks: &[Song]) -> f32 {
    let mut confidence = popularity.min(100) as f32 * 3.0 / 10.0;
    let is_recent = recent_tracks
        .iter()
        .any(|recent| recent.name.eq_ignore_ascii_case(&song.name));
    if !is_recent {
        confidence += 20.0;
    }
    confidence += 50.0;
    confidence.min(100.0)
}

/// Turns recommender output into ranked candidates, best first.
fn rank(tracks: Vec<RecommendedTrack>, recent_tracks: &[Song]) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = tracks
        .into_iter()
        .map(|track| {
            let confidence = track.confidence.unwrap_or_else(|| {
                score_candidate(&track.song, track.popularity.unwrap_or(0), recent_tracks)
            });
            RankedCandidate {
                song: track.song,
                confidence,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
}

/// Recommender reached over HTTP.
pub struct HttpRecommendationGateway {
    client: Client,
    url: String,
}

impl HttpRecommendationGateway {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RecommendationGateway for HttpRecommendationGateway {
    async fn suggest(
        &self,
        request: &RecommendationRequest,
    ) -> GatewayResult<Vec<RankedCandidate>> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::HttpStatus(status.as_u16(), body));
        }
        let body = response.text().await?;
        let tracks: Vec<RecommendedTrack> =
            serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        log::info!(
            "[Recommend] {} candidates for session {}",
            tracks.len(),
            request.session_id
        );
        Ok(rank(tracks, &request.recent_tracks))
    }
}

/// Used when no recommender is configured.
pub struct NoopRecommendationGateway;

#[async_trait]
impl RecommendationGateway for NoopRecommendationGateway {
    async fn suggest(
        &self,
        _request: &RecommendationRequest,
    ) -> GatewayResult<Vec<RankedCandidate>> {
        Err(GatewayError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::fixtures::song;

    #[test]
    fn unheard_popular_track_scores_high() {
        let track = song("a");
        assert_eq!(score_candidate(&track, 100, &[]), 100.0);
        assert_eq!(score_candidate(&track, 50, &[]), 85.0);
    }

    #[test]
    fn recently_heard_track_loses_novelty_bonus() {
        let track = song("a");
        let mut heard = song("other-id");
        heard.name = track.name.to_uppercase();
        assert_eq!(score_candidate(&track, 0, &[heard]), 50.0);
    }

    #[test]
    fn rank_prefers_explicit_confidence_and_sorts() {
        let body = r#"[
            {"id": "a", "name": "A", "artist": "X", "uri": "spotify:track:a", "popularity": 10},
            {"id": "b", "name": "B", "artist": "Y", "uri": "spotify:track:b", "confidence": 99.0}
        ]"#;
        let tracks: Vec<RecommendedTrack> = serde_json::from_str(body).unwrap();
        let ranked = rank(tracks, &[]);
        assert_eq!(ranked[0].song.id, "b");
        assert_eq!(ranked[1].confidence, 73.0);
    }

    #[tokio::test]
    async fn noop_gateway_reports_not_configured() {
        let request = RecommendationRequest {
            session_id: "ABCD".into(),
            top_genres: vec![],
            recent_tracks: vec![],
        };
        let err = NoopRecommendationGateway.suggest(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured));
    }
}
