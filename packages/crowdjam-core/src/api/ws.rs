//! WebSocket handler for real-time participant communication.
//!
//! Each connection sends commands and receives, once bound to a session by
//! `create_session` or `join_session`, every broadcast of that session.
//! Replies to a command (`ack`, `error`, `heartbeat_ack`) go to the issuing
//! connection only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::ws_connection::{Binding, ConnectionGuard};
use crate::api::AppState;
use crate::error::{CrowdjamError, CrowdjamResult};
use crate::events::{BroadcastEvent, SessionEvent};
use crate::services::{CommandOutcome, SessionCommand, SessionEngine};
use crate::session::Song;
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming WebSocket message envelope.
#[derive(Debug, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
enum WsIncoming {
    CreateSession {
        #[serde(default)]
        session_id: Option<String>,
        host_id: String,
        host_name: String,
    },
    JoinSession {
        session_id: String,
        user_id: String,
        user_name: String,
    },
    StartSession {
        session_id: String,
        host_id: String,
    },
    SubmitGenreVotes {
        session_id: String,
        user_id: String,
        genres: Vec<String>,
    },
    SubmitSongSuggestion {
        session_id: String,
        user_id: String,
        song: Song,
    },
    SubmitSongVote {
        session_id: String,
        user_id: String,
        song_id: String,
    },
    RequestRecommendations {
        session_id: String,
    },
    EndSession {
        session_id: String,
        host_id: String,
    },
    LeaveSession {
        session_id: String,
        user_id: String,
    },
    Heartbeat,
}

impl WsIncoming {
    /// The engine command, `None` for transport-level messages.
    fn into_command(self) -> Option<SessionCommand> {
        let command = match self {
            Self::CreateSession {
                session_id,
                host_id,
                host_name,
            } => SessionCommand::CreateSession {
                session_id,
                host_id,
                host_name,
            },
            Self::JoinSession {
                session_id,
                user_id,
                user_name,
            } => SessionCommand::JoinSession {
                session_id,
                user_id,
                user_name,
            },
            Self::StartSession {
                session_id,
                host_id,
            } => SessionCommand::StartSession {
                session_id,
                host_id,
            },
            Self::SubmitGenreVotes {
                session_id,
                user_id,
                genres,
            } => SessionCommand::SubmitGenreVotes {
                session_id,
                user_id,
                genres,
            },
            Self::SubmitSongSuggestion {
                session_id,
                user_id,
                song,
            } => SessionCommand::SubmitSongSuggestion {
                session_id,
                user_id,
                song,
            },
            Self::SubmitSongVote {
                session_id,
                user_id,
                song_id,
            } => SessionCommand::SubmitSongVote {
                session_id,
                user_id,
                song_id,
            },
            Self::RequestRecommendations { session_id } => {
                SessionCommand::RequestRecommendations { session_id }
            }
            Self::EndSession {
                session_id,
                host_id,
            } => SessionCommand::EndSession {
                session_id,
                host_id,
            },
            Self::LeaveSession {
                session_id,
                user_id,
            } => SessionCommand::LeaveSession {
                session_id,
                user_id,
            },
            Self::Heartbeat => return None,
        };
        Some(command)
    }
}

/// Replies sent to the issuing connection only.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsOutgoing {
    Ack {
        command: &'static str,
        #[serde(flatten)]
        outcome: CommandOutcome,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<&'static str>,
        code: &'static str,
        message: String,
    },
    HeartbeatAck,
}

impl WsOutgoing {
    fn error(command: Option<&'static str>, err: &CrowdjamError) -> Self {
        Self::Error {
            command,
            code: err.code(),
            message: err.to_string(),
        }
    }

    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

fn event_message(event: &BroadcastEvent) -> Option<Message> {
    serde_json::to_string(event)
        .ok()
        .map(|s| Message::Text(s.into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Command Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Session and participant a command acts on, if any.
fn command_identity(command: &SessionCommand) -> Option<(&str, &str)> {
    match command {
        SessionCommand::StartSession {
            session_id,
            host_id,
        }
        | SessionCommand::EndSession {
            session_id,
            host_id,
        } => Some((session_id, host_id)),
        SessionCommand::SubmitGenreVotes {
            session_id,
            user_id,
            ..
        }
        | SessionCommand::SubmitSongSuggestion {
            session_id,
            user_id,
            ..
        }
        | SessionCommand::SubmitSongVote {
            session_id,
            user_id,
            ..
        }
        | SessionCommand::LeaveSession {
            session_id,
            user_id,
        } => Some((session_id, user_id)),
        SessionCommand::CreateSession { .. }
        | SessionCommand::JoinSession { .. }
        | SessionCommand::RequestRecommendations { .. } => None,
    }
}

/// Rejects commands that act as someone other than the participant this
/// connection is bound to within the same session.
fn check_identity(binding: Option<&Binding>, command: &SessionCommand) -> CrowdjamResult<()> {
    let (Some(binding), Some((session_id, user_id))) = (binding, command_identity(command)) else {
        return Ok(());
    };
    if binding.session_id.eq_ignore_ascii_case(session_id) && binding.user_id != user_id {
        return Err(CrowdjamError::Forbidden(format!(
            "connection acts as {} in session {}",
            binding.user_id, binding.session_id
        )));
    }
    Ok(())
}

async fn handle_command(
    engine: &Arc<SessionEngine>,
    conn: &ConnectionGuard,
    command: SessionCommand,
) -> WsOutgoing {
    let name = command.name();
    let binding = conn.binding();
    if let Err(e) = check_identity(binding.as_ref(), &command) {
        return WsOutgoing::error(Some(name), &e);
    }

    match engine.dispatch(command).await {
        Ok(outcome) => {
            if let Some(user_id) = &outcome.user_id {
                if let Some(previous) = conn.bind(&outcome.session_id, user_id) {
                    leave(engine, &previous).await;
                }
            }
            WsOutgoing::Ack {
                command: name,
                outcome,
            }
        }
        Err(e) => {
            log::debug!("[WS] {} rejected on {}: {}", name, conn.id(), e);
            WsOutgoing::error(Some(name), &e)
        }
    }
}

async fn leave(engine: &Arc<SessionEngine>, binding: &Binding) {
    let command = SessionCommand::LeaveSession {
        session_id: binding.session_id.clone(),
        user_id: binding.user_id.clone(),
    };
    if let Err(e) = engine.dispatch(command).await {
        log::debug!(
            "[WS] Leave of {} from {} not applied: {}",
            binding.user_id,
            binding.session_id,
            e
        );
    }
}

/// Whether a broadcast belongs to the connection's session.
fn is_for(binding: Option<&Binding>, event: &BroadcastEvent) -> bool {
    binding.is_some_and(|b| b.session_id == event.session_id())
}

/// Fresh snapshot for a connection that missed broadcasts.
async fn resync(engine: &SessionEngine, binding: &Binding) -> Option<BroadcastEvent> {
    let session = engine.registry().get(&binding.session_id).await.ok()?;
    Some(BroadcastEvent::Session(SessionEvent::SessionUpdated {
        session_id: session.id.clone(),
        session: Box::new(session),
        timestamp: now_millis(),
    }))
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: Option<Message>) -> bool {
    match msg {
        Some(msg) => sender.send(msg).await.is_ok(),
        None => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Loop
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.event_bridge.subscribe();
    let mut last_activity = Instant::now();

    let conn = state.ws_manager.register();
    let cancel_token = conn.cancel_token().clone();

    let (heartbeat_timeout, check_interval) = {
        let config = state.config.read();
        (
            Duration::from_secs(config.ws_heartbeat_timeout_secs),
            Duration::from_secs(config.ws_heartbeat_check_interval_secs),
        )
    };
    let mut heartbeat_interval = tokio::time::interval(check_interval);
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn.id());
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(incoming) => match incoming.into_command() {
                                Some(command) => handle_command(&state.engine, &conn, command).await,
                                None => WsOutgoing::HeartbeatAck,
                            },
                            Err(e) => WsOutgoing::error(
                                None,
                                &CrowdjamError::InvalidRequest(format!("malformed message: {}", e)),
                            ),
                        };
                        if !send(&mut sender, reply.to_message()).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = WsOutgoing::error(
                            None,
                            &CrowdjamError::InvalidRequest("binary frames are not supported".into()),
                        );
                        if !send(&mut sender, reply.to_message()).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            received = broadcast_rx.recv() => {
                let binding = conn.binding();
                let outgoing = match received {
                    Ok(event) if is_for(binding.as_ref(), &event) => Some(event),
                    Ok(_) => None,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[WS] {} lagged by {} event(s), resyncing", conn.id(), skipped);
                        match &binding {
                            Some(b) => resync(&state.engine, b).await,
                            None => None,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(event) = outgoing {
                    if !send(&mut sender, event_message(&event)).await {
                        break;
                    }
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > heartbeat_timeout {
                    log::warn!("[WS] Heartbeat timeout: {}", conn.id());
                    break;
                }
            }
        }
    }

    // A dropped connection counts as the participant leaving.
    if let Some(binding) = conn.binding() {
        leave(&state.engine, &binding).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(session_id: &str, user_id: &str) -> Binding {
        Binding {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }

    #[test]
    fn parses_commands_with_camel_case_payloads() {
        let text = json!({
            "type": "submit_song_vote",
            "payload": {"sessionId": "ABCD", "userId": "alice", "songId": "s1"}
        })
        .to_string();
        let command = serde_json::from_str::<WsIncoming>(&text)
            .unwrap()
            .into_command()
            .unwrap();
        assert_eq!(command.name(), "submit_song_vote");
    }

    #[test]
    fn create_session_id_is_optional() {
        let text = json!({
            "type": "create_session",
            "payload": {"hostId": "host", "hostName": "Host"}
        })
        .to_string();
        let incoming = serde_json::from_str::<WsIncoming>(&text).unwrap();
        assert!(matches!(
            incoming,
            WsIncoming::CreateSession {
                session_id: None,
                ..
            }
        ));
    }

    #[test]
    fn heartbeat_has_no_command() {
        let incoming = serde_json::from_str::<WsIncoming>(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(incoming.into_command().is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<WsIncoming>(r#"{"type":"set_volume"}"#).is_err());
    }

    #[test]
    fn bound_connection_cannot_act_as_someone_else() {
        let bound = binding("ABCD", "alice");
        let vote = |user: &str| SessionCommand::SubmitSongVote {
            session_id: "abcd".into(),
            user_id: user.into(),
            song_id: "s1".into(),
        };
        assert!(check_identity(Some(&bound), &vote("alice")).is_ok());
        let err = check_identity(Some(&bound), &vote("bob")).unwrap_err();
        assert_eq!(err.code(), "forbidden");
        assert!(check_identity(None, &vote("bob")).is_ok());
    }

    #[test]
    fn events_are_scoped_to_the_bound_session() {
        let event = BroadcastEvent::Session(SessionEvent::SessionEnded {
            session_id: "ABCD".into(),
            reason: crate::events::EndReason::EndedByHost,
            timestamp: 0,
        });
        assert!(is_for(Some(&binding("ABCD", "alice")), &event));
        assert!(!is_for(Some(&binding("WXYZ", "alice")), &event));
        assert!(!is_for(None, &event));
    }

    #[test]
    fn ack_flattens_the_outcome() {
        let reply = WsOutgoing::Ack {
            command: "join_session",
            outcome: CommandOutcome {
                session_id: "ABCD".into(),
                user_id: Some("alice".into()),
                session: None,
                added: None,
            },
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "ack");
        assert_eq!(value["command"], "join_session");
        assert_eq!(value["sessionId"], "ABCD");
        assert_eq!(value["userId"], "alice");
    }

    #[test]
    fn error_carries_code_and_message() {
        let reply = WsOutgoing::error(Some("submit_song_vote"), &CrowdjamError::Empty);
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "queue_empty");
        assert_eq!(value["message"], "Queue is empty");
    }
}
