//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between the engine and
//! transport concerns, mapping typed domain events to the WebSocket
//! broadcast channel.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, QueueEvent, RoundEvent, SessionEvent};

/// Bridges domain events to the WebSocket broadcast channel.
///
/// Events are also forwarded to an optional external emitter that can be set
/// after construction (the server uses it for debug logging).
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    /// Optional external emitter for additional delivery
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every event as well.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    ///
    /// WebSocket handlers use this to subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_session, SessionEvent, Session);
    impl_emit!(emit_round, RoundEvent, Round);
    impl_emit!(emit_queue, QueueEvent, Queue);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::RecordingEventEmitter;

    #[tokio::test]
    async fn subscribers_and_external_emitter_both_receive() {
        let bridge = BroadcastEventBridge::new(8);
        let external = Arc::new(RecordingEventEmitter::default());
        bridge.set_external_emitter(external.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_round(RoundEvent::VotingTimeUpdate {
            session_id: "ABCD".into(),
            seconds_remaining: 12,
            timestamp: 0,
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id(), "ABCD");
        assert_eq!(external.count("voting_time_update"), 1);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.set_external_emitter(Arc::new(crate::events::NoopEventEmitter));
        bridge.emit_session(SessionEvent::SessionEnded {
            session_id: "ABCD".into(),
            reason: crate::events::EndReason::Shutdown,
            timestamp: 0,
        });
    }
}
