//! Gateways to the external music and recommendation services.
//!
//! # Module Structure
//!
//! - `traits` - Trait abstractions the engine depends on
//! - `retry` - Exponential backoff for transient failures
//! - `tokens` - Per-host access token store
//! - `spotify` - Spotify Web API implementation of [`MusicServiceGateway`]
//! - `recommendation` - HTTP recommender and the no-op fallback
//!
//! The engine never holds a session lock while a gateway call is in flight.

pub mod recommendation;
pub(crate) mod retry;
pub mod spotify;
pub mod tokens;
pub mod traits;

use thiserror::Error;

pub use recommendation::{HttpRecommendationGateway, NoopRecommendationGateway};
pub use spotify::SpotifyGateway;
pub use tokens::HostTokenStore;
pub use traits::{MusicServiceGateway, RecommendationGateway, RecommendationRequest};

/// Errors from the external service gateways.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request could not be sent or the response not read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("HTTP {0}: {1}")]
    HttpStatus(u16, String),

    /// The host has not registered an access token.
    #[error("No access token registered for host {0}")]
    MissingToken(String),

    /// The response body did not have the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The gateway has no endpoint configured.
    #[error("Gateway not configured")]
    NotConfigured,
}

impl GatewayError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::HttpStatus(status, _) => *status == 429 || *status >= 500,
            Self::MissingToken(_) | Self::Decode(_) | Self::NotConfigured => false,
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert!(GatewayError::HttpStatus(503, String::new()).is_transient());
        assert!(GatewayError::HttpStatus(429, String::new()).is_transient());
        assert!(!GatewayError::HttpStatus(401, String::new()).is_transient());
        assert!(!GatewayError::MissingToken("h".into()).is_transient());
        assert!(!GatewayError::NotConfigured.is_transient());
    }
}
