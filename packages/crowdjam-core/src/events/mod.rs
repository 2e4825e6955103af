//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for the engine to emit events
//! - [`BroadcastEventBridge`] for WebSocket transport
//! - Event types for sessions, rounds and the queue
//!
//! Every event carries the id of the session it belongs to. The WebSocket
//! layer uses [`BroadcastEvent::session_id`] to deliver each event only to
//! that session's participants.

mod bridge;
pub(crate) mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::session::{GenreTally, Phase, Session, SongEntry};

/// Events broadcast to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Session membership and lifecycle.
    Session(SessionEvent),

    /// Voting round progress.
    Round(RoundEvent),

    /// Queue and playback.
    Queue(QueueEvent),
}

impl BroadcastEvent {
    /// Id of the session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Session(e) => e.session_id(),
            Self::Round(e) => e.session_id(),
            Self::Queue(e) => e.session_id(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    EndedByHost,
    /// Deleted through the administrative HTTP route.
    Deleted,
    HostDisconnected,
    Empty,
    Shutdown,
}

/// Session membership and lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    /// Full snapshot after any membership or state change.
    SessionUpdated {
        session_id: String,
        session: Box<Session>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The session is gone. Clients should leave.
    SessionEnded {
        session_id: String,
        reason: EndReason,
        timestamp: u64,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionUpdated { session_id, .. } | Self::SessionEnded { session_id, .. } => {
                session_id
            }
        }
    }
}

/// Voting round events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RoundEvent {
    /// Running genre tallies.
    GenreVotingResults {
        session_id: String,
        genres: Vec<GenreTally>,
        timestamp: u64,
    },
    /// Genre vote countdown, sent once per second.
    VotingTimeUpdate {
        session_id: String,
        seconds_remaining: u64,
        timestamp: u64,
    },
    /// Suggestions of the current round and, once frozen, the ballot.
    SongSuggestionsUpdated {
        session_id: String,
        suggestions: Vec<SongEntry>,
        votable_options: Vec<SongEntry>,
        votes: Vec<crate::session::VoteCount>,
        timestamp: u64,
    },
    /// The round entered a new phase.
    PhaseUpdate {
        session_id: String,
        phase: Phase,
        round: u64,
        time_remaining_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        winner: Option<SongEntry>,
        timestamp: u64,
    },
}

impl RoundEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::GenreVotingResults { session_id, .. }
            | Self::VotingTimeUpdate { session_id, .. }
            | Self::SongSuggestionsUpdated { session_id, .. }
            | Self::PhaseUpdate { session_id, .. } => session_id,
        }
    }
}

/// Queue and playback events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum QueueEvent {
    /// The queue, current song or up-next slot changed.
    QueueUpdated {
        session_id: String,
        queue: Vec<SongEntry>,
        current_song: Option<SongEntry>,
        up_next: Option<SongEntry>,
        timestamp: u64,
    },
    /// The host's player should start this track.
    PlayTrack {
        session_id: String,
        uri: String,
        position_ms: u64,
        timestamp: u64,
    },
}

impl QueueEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::QueueUpdated { session_id, .. } | Self::PlayTrack { session_id, .. } => {
                session_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_category_and_type() {
        let event = BroadcastEvent::Queue(QueueEvent::PlayTrack {
            session_id: "ABCD".into(),
            uri: "spotify:track:1".into(),
            position_ms: 0,
            timestamp: 7,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "queue");
        assert_eq!(json["type"], "play_track");
        assert_eq!(json["sessionId"], "ABCD");
        assert_eq!(json["positionMs"], 0);
        assert_eq!(event.session_id(), "ABCD");
    }

    #[test]
    fn phase_update_uses_wire_phase_names() {
        let event = RoundEvent::PhaseUpdate {
            session_id: "ABCD".into(),
            phase: Phase::Suggestion,
            round: 1,
            time_remaining_ms: 90_000,
            winner: None,
            timestamp: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "SUGGESTION");
        assert_eq!(json["timeRemainingMs"], 90_000);
        assert!(json.get("winner").is_none());
    }
}
