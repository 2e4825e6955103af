//! Spotify Web API implementation of [`MusicServiceGateway`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::tokens::HostTokenStore;
use super::traits::MusicServiceGateway;
use super::{GatewayError, GatewayResult};
use crate::protocol_constants::SEARCH_RESULT_LIMIT;
use crate::session::{PlaybackProgress, Song};

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    progress_ms: Option<u64>,
    #[serde(default)]
    item: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    #[serde(default)]
    album: Option<SpotifyAlbum>,
    #[serde(default)]
    duration_ms: u64,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchPage,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

impl SpotifyTrack {
    /// Converts to a [`Song`]. Local files have no id and are skipped.
    fn into_song(self) -> Option<Song> {
        let id = self.id?;
        Some(Song {
            id,
            name: self.name,
            artist: self
                .artists
                .into_iter()
                .next()
                .map(|a| a.name)
                .unwrap_or_default(),
            album_art: self
                .album
                .and_then(|a| a.images.into_iter().next())
                .map(|i| i.url),
            duration_ms: self.duration_ms,
            uri: self.uri,
        })
    }
}

/// Parses a `/me/player/currently-playing` body.
fn parse_currently_playing(body: &str) -> GatewayResult<Option<PlaybackProgress>> {
    let playing: CurrentlyPlaying =
        serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    let Some(track) = playing.item else {
        return Ok(None);
    };
    let Some(track_id) = track.id else {
        return Ok(None);
    };
    Ok(Some(PlaybackProgress {
        track_id,
        progress_ms: playing.progress_ms.unwrap_or(0),
        duration_ms: track.duration_ms,
        is_playing: playing.is_playing,
    }))
}

/// Parses a `/search?type=track` body.
fn parse_search(body: &str) -> GatewayResult<Vec<Song>> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    Ok(response
        .tracks
        .items
        .into_iter()
        .filter_map(SpotifyTrack::into_song)
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// Spotify Web API client acting with each host's access token.
pub struct SpotifyGateway {
    client: Client,
    base_url: String,
    tokens: Arc<HostTokenStore>,
}

impl SpotifyGateway {
    /// Creates a gateway against `base_url` (e.g. `https://api.spotify.com/v1`).
    pub fn new(client: Client, base_url: impl Into<String>, tokens: Arc<HostTokenStore>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request authorized as `host_id`, mapping error statuses.
    async fn send(&self, host_id: &str, request: RequestBuilder) -> GatewayResult<Response> {
        let token = self
            .tokens
            .get(host_id)
            .ok_or_else(|| GatewayError::MissingToken(host_id.to_string()))?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::HttpStatus(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl MusicServiceGateway for SpotifyGateway {
    async fn playback_progress(&self, host_id: &str) -> GatewayResult<Option<PlaybackProgress>> {
        let request = self.client.get(self.url("/me/player/currently-playing"));
        let response = self.send(host_id, request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        parse_currently_playing(&body)
    }

    async fn enqueue_track(&self, host_id: &str, uri: &str) -> GatewayResult<()> {
        let request = self
            .client
            .post(self.url("/me/player/queue"))
            .query(&[("uri", uri)]);
        self.send(host_id, request).await?;
        log::info!("[Spotify] Queued {} for host {}", uri, host_id);
        Ok(())
    }

    async fn search(&self, host_id: &str, query: &str) -> GatewayResult<Vec<Song>> {
        let limit = SEARCH_RESULT_LIMIT.to_string();
        let request = self.client.get(self.url("/search")).query(&[
            ("q", query),
            ("type", "track"),
            ("limit", limit.as_str()),
        ]);
        let body = self.send(host_id, request).await?.text().await?;
        parse_search(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENTLY_PLAYING: &str = r#"{
        "is_playing": true,
        "progress_ms": 42000,
        "item": {
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Never Gonna Give You Up",
            "artists": [{"name": "Rick Astley"}],
            "album": {"images": [{"url": "https://i.scdn.co/image/abc"}]},
            "duration_ms": 213573,
            "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
            "popularity": 77
        }
    }"#;

    #[test]
    fn parses_currently_playing() {
        let progress = parse_currently_playing(CURRENTLY_PLAYING).unwrap().unwrap();
        assert_eq!(progress.track_id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(progress.progress_ms, 42_000);
        assert_eq!(progress.duration_ms, 213_573);
        assert!(progress.is_playing);
    }

    #[test]
    fn currently_playing_without_item_is_none() {
        let progress = parse_currently_playing(r#"{"is_playing": false, "item": null}"#).unwrap();
        assert!(progress.is_none());
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let err = parse_currently_playing("<html>").unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[test]
    fn search_maps_tracks_and_skips_local_files() {
        let body = r#"{"tracks": {"items": [
            {"id": "a", "name": "A", "artists": [{"name": "X"}], "duration_ms": 1000, "uri": "spotify:track:a"},
            {"id": null, "name": "Local", "uri": "spotify:local:x"}
        ]}}"#;
        let songs = parse_search(body).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].artist, "X");
        assert!(songs[0].album_art.is_none());
    }

    #[tokio::test]
    async fn missing_token_fails_without_a_request() {
        let gateway = SpotifyGateway::new(
            Client::new(),
            "http://127.0.0.1:9",
            Arc::new(HostTokenStore::new()),
        );
        let err = gateway.playback_progress("host").await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingToken(_)));
    }
}
