//! Event emitter abstraction for decoupling the engine from transport.
//!
//! The engine depends on the [`EventEmitter`] trait rather than a concrete
//! broadcast channel, so tests can record events and alternative transports
//! can be plugged in.

use super::{QueueEvent, RoundEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a session membership or lifecycle event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a voting round event.
    fn emit_round(&self, event: RoundEvent);

    /// Emits a queue or playback event.
    fn emit_queue(&self, event: QueueEvent);
}

/// No-op emitter for tests and embedders without clients.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}

    fn emit_round(&self, _event: RoundEvent) {}

    fn emit_queue(&self, _event: QueueEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_round(&self, event: RoundEvent) {
        tracing::debug!(?event, "round_event");
    }

    fn emit_queue(&self, event: QueueEvent) {
        tracing::debug!(?event, "queue_event");
    }
}

/// Test emitter that keeps every event it receives.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingEventEmitter {
    events: parking_lot::Mutex<Vec<super::BroadcastEvent>>,
}

#[cfg(test)]
impl RecordingEventEmitter {
    pub fn events(&self) -> Vec<super::BroadcastEvent> {
        self.events.lock().clone()
    }

    /// Wire `type` names of the recorded events, in order.
    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| {
                serde_json::to_value(e)
                    .ok()
                    .and_then(|v| v["type"].as_str().map(str::to_string))
            })
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| *t == event_type).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
impl EventEmitter for RecordingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        self.events.lock().push(super::BroadcastEvent::Session(event));
    }

    fn emit_round(&self, event: RoundEvent) {
        self.events.lock().push(super::BroadcastEvent::Round(event));
    }

    fn emit_queue(&self, event: QueueEvent) {
        self.events.lock().push(super::BroadcastEvent::Queue(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_emitter_tracks_event_types() {
        let emitter = RecordingEventEmitter::default();

        emitter.emit_round(RoundEvent::VotingTimeUpdate {
            session_id: "ABCD".to_string(),
            seconds_remaining: 29,
            timestamp: 0,
        });
        emitter.emit_queue(QueueEvent::PlayTrack {
            session_id: "ABCD".to_string(),
            uri: "spotify:track:1".to_string(),
            position_ms: 0,
            timestamp: 0,
        });
        emitter.emit_round(RoundEvent::VotingTimeUpdate {
            session_id: "ABCD".to_string(),
            seconds_remaining: 28,
            timestamp: 0,
        });

        assert_eq!(emitter.count("voting_time_update"), 2);
        assert_eq!(emitter.count("play_track"), 1);
        assert_eq!(emitter.events().len(), 3);
    }
}
