//! Session engine: routes participant commands and drives voting rounds.
//!
//! Every mutation runs inside [`SessionRegistry::with_session`], which holds
//! that session's lock. Work done under the lock is synchronous: it mutates
//! the session and returns the events to broadcast plus any side effects
//! (gateway calls, timers) to perform once the lock is released.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::error::{CrowdjamError, CrowdjamResult};
use crate::events::{BroadcastEvent, EndReason, EventEmitter, QueueEvent, RoundEvent, SessionEvent};
use crate::gateway::retry::with_retry;
use crate::gateway::{MusicServiceGateway, RecommendationGateway, RecommendationRequest};
use crate::protocol_constants::MAX_GENRES_PER_BALLOT;
use crate::services::scheduler::SessionScheduler;
use crate::services::session_registry::SessionRegistry;
use crate::session::{
    lifecycle, phase_clock, queue, vote_ledger, ObservedProgress, Phase, PhaseAdvance,
    PlaybackProgress, RoundClosure, Session, SessionState, Song, TrackObservation,
};
use crate::state::{EngineConfig, HostDisconnectPolicy};
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// A participant command.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    CreateSession {
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
}

impl SessionCommand {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::JoinSession { .. } => "join_session",
            Self::StartSession { .. } => "start_session",
            Self::SubmitGenreVotes { .. } => "submit_genre_votes",
            Self::SubmitSongSuggestion { .. } => "submit_song_suggestion",
            Self::SubmitSongVote { .. } => "submit_song_vote",
            Self::RequestRecommendations { .. } => "request_recommendations",
            Self::EndSession { .. } => "end_session",
            Self::LeaveSession { .. } => "leave_session",
        }
    }
}

/// What an accepted command produced for its issuer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub session_id: String,
    /// Participant the issuing connection now acts as (create and join).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    /// Entries added to the queue by a recommendation request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<usize>,
}

impl CommandOutcome {
    fn ack(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: None,
            session: None,
            added: None,
        }
    }

    fn bound(session: Session, user_id: &str) -> Self {
        Self {
            session_id: session.id.clone(),
            user_id: Some(user_id.to_string()),
            session: Some(session),
            added: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settlement
// ─────────────────────────────────────────────────────────────────────────────

/// Events and side effects produced under a session lock.
#[derive(Default)]
struct Settlement {
    events: Vec<BroadcastEvent>,
    /// `(host_id, uri)` to append to the host player's queue.
    enqueue: Option<(String, String)>,
    /// Epoch of a genre vote whose countdown must be started.
    genre_timer: Option<u64>,
    recommend: bool,
}

fn session_updated(session: &Session, now: u64) -> BroadcastEvent {
    BroadcastEvent::Session(SessionEvent::SessionUpdated {
        session_id: session.id.clone(),
        session: Box::new(session.clone()),
        timestamp: now,
    })
}

fn queue_updated(session: &Session, now: u64) -> BroadcastEvent {
    BroadcastEvent::Queue(QueueEvent::QueueUpdated {
        session_id: session.id.clone(),
        queue: session.queue.clone(),
        current_song: session.current_song.clone(),
        up_next: session.up_next.clone(),
        timestamp: now,
    })
}

fn suggestions_updated(session: &Session, now: u64) -> BroadcastEvent {
    BroadcastEvent::Round(RoundEvent::SongSuggestionsUpdated {
        session_id: session.id.clone(),
        suggestions: queue::suggestions_in_order(session),
        votable_options: session.votable_options.clone(),
        votes: vote_ledger::tally(session),
        timestamp: now,
    })
}

fn genre_results(session: &Session, now: u64) -> BroadcastEvent {
    BroadcastEvent::Round(RoundEvent::GenreVotingResults {
        session_id: session.id.clone(),
        genres: session.genre_tally.clone(),
        timestamp: now,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Routes commands and drives every session's rounds.
pub struct SessionEngine {
    registry: Arc<SessionRegistry>,
    music: Arc<dyn MusicServiceGateway>,
    recommender: Arc<dyn RecommendationGateway>,
    emitter: Arc<dyn EventEmitter>,
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

impl SessionEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        music: Arc<dyn MusicServiceGateway>,
        recommender: Arc<dyn RecommendationGateway>,
        emitter: Arc<dyn EventEmitter>,
        config: EngineConfig,
    ) -> Self {
        let rng = match config.tie_break_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            registry,
            music,
            recommender,
            emitter,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Executes a participant command.
    ///
    /// A rejected command returns an error for the issuer only; the session
    /// and every other participant are unaffected.
    pub async fn dispatch(self: &Arc<Self>, command: SessionCommand) -> CrowdjamResult<CommandOutcome> {
        match command {
            SessionCommand::CreateSession {
                session_id,
                host_id,
                host_name,
            } => self.create_session(session_id, &host_id, &host_name).await,
            SessionCommand::JoinSession {
                session_id,
                user_id,
                user_name,
            } => self.join_session(&session_id, &user_id, &user_name).await,
            SessionCommand::StartSession {
                session_id,
                host_id,
            } => self.start_session(&session_id, &host_id).await,
            SessionCommand::SubmitGenreVotes {
                session_id,
                user_id,
                genres,
            } => self.submit_genre_votes(&session_id, &user_id, &genres).await,
            SessionCommand::SubmitSongSuggestion {
                session_id,
                user_id,
                song,
            } => self.submit_song_suggestion(&session_id, &user_id, song).await,
            SessionCommand::SubmitSongVote {
                session_id,
                user_id,
                song_id,
            } => self.submit_song_vote(&session_id, &user_id, &song_id).await,
            SessionCommand::RequestRecommendations { session_id } => {
                let added = self.recommend(&session_id).await?;
                Ok(CommandOutcome {
                    added: Some(added),
                    ..CommandOutcome::ack(&session_id)
                })
            }
            SessionCommand::EndSession {
                session_id,
                host_id,
            } => self.end_session(&session_id, &host_id).await,
            SessionCommand::LeaveSession {
                session_id,
                user_id,
            } => self.leave_session(&session_id, &user_id).await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_session(
        self: &Arc<Self>,
        requested_id: Option<String>,
        host_id: &str,
        host_name: &str,
    ) -> CrowdjamResult<CommandOutcome> {
        let now = now_millis();
        let session = self
            .registry
            .create(requested_id.as_deref(), host_id, host_name, now)
            .await?;
        self.ensure_ticker(&session.id).await?;
        self.publish(vec![session_updated(&session, now)]);
        Ok(CommandOutcome::bound(session, host_id))
    }

    pub async fn join_session(
        self: &Arc<Self>,
        session_id: &str,
        user_id: &str,
        user_name: &str,
    ) -> CrowdjamResult<CommandOutcome> {
        let session = self.registry.join(session_id, user_id, user_name).await?;
        // Sessions restored from the store come back without a ticker.
        self.ensure_ticker(&session.id).await?;
        self.publish(vec![session_updated(&session, now_millis())]);
        Ok(CommandOutcome::bound(session, user_id))
    }

    pub async fn leave_session(
        self: &Arc<Self>,
        session_id: &str,
        user_id: &str,
    ) -> CrowdjamResult<CommandOutcome> {
        let departure = self.registry.leave(session_id, user_id).await?;
        let id = departure.session.id.clone();
        let policy = self.config.host_disconnect;

        if departure.was_host {
            match policy {
                HostDisconnectPolicy::EndImmediately => {
                    self.teardown(&id, EndReason::HostDisconnected).await?;
                    return Ok(CommandOutcome::ack(&id));
                }
                HostDisconnectPolicy::GracePeriod { secs } => {
                    log::info!(
                        "[Engine] Host of {} disconnected, ending in {}s unless they return",
                        id,
                        secs
                    );
                    let handle = self.registry.handle(&id).await?;
                    let engine = Arc::clone(self);
                    let session_id = id.clone();
                    let departure_epoch = departure.session.host_departures;
                    handle.scheduler().spawn_after(
                        "host-grace",
                        Duration::from_secs(secs),
                        async move {
                            engine
                                .end_if_host_absent(&session_id, departure_epoch)
                                .await;
                        },
                    );
                }
                HostDisconnectPolicy::Ignore => {}
            }
        }

        let grace = matches!(policy, HostDisconnectPolicy::GracePeriod { .. });
        if departure.remaining == 0 && !grace {
            self.teardown(&id, EndReason::Empty).await?;
        } else {
            self.publish(vec![session_updated(&departure.session, now_millis())]);
        }
        Ok(CommandOutcome::ack(&id))
    }

    /// Ends the session if the host is still gone since the disconnect
    /// numbered `departure_epoch`. A rejoin followed by a new disconnect
    /// leaves that later grace timer in charge.
    async fn end_if_host_absent(&self, session_id: &str, departure_epoch: u64) {
        let absent = self
            .registry
            .read(session_id, |s| {
                s.host_departures == departure_epoch
                    && s.participant(&s.host_id).map_or(true, |host| !host.connected)
            })
            .await;
        if let Ok(true) = absent {
            if let Err(e) = self.teardown(session_id, EndReason::HostDisconnected).await {
                log::warn!("[Engine] Failed to end session {}: {}", session_id, e);
            }
        }
    }

    pub async fn end_session(
        &self,
        session_id: &str,
        requester: &str,
    ) -> CrowdjamResult<CommandOutcome> {
        let session = self.registry.end(session_id, requester).await?;
        self.emit_ended(&session.id, EndReason::EndedByHost);
        Ok(CommandOutcome::ack(&session.id))
    }

    /// Removes a session regardless of who asked (admin deletion, shutdown).
    pub async fn teardown(&self, session_id: &str, reason: EndReason) -> CrowdjamResult<()> {
        let session = self.registry.remove(session_id).await?;
        self.emit_ended(&session.id, reason);
        Ok(())
    }

    /// Ends every live session.
    pub async fn shutdown(&self) {
        for id in self.registry.session_ids() {
            if let Err(e) = self.teardown(&id, EndReason::Shutdown).await {
                log::warn!("[Engine] Failed to end session {} on shutdown: {}", id, e);
            }
        }
    }

    fn emit_ended(&self, session_id: &str, reason: EndReason) {
        log::info!("[Engine] Session {} ended ({:?})", session_id, reason);
        self.emitter.emit_session(SessionEvent::SessionEnded {
            session_id: session_id.to_string(),
            reason,
            timestamp: now_millis(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Genre vote
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn start_session(
        self: &Arc<Self>,
        session_id: &str,
        requester: &str,
    ) -> CrowdjamResult<CommandOutcome> {
        let now = now_millis();
        let session = self
            .registry
            .with_session(session_id, |s| {
                lifecycle::start(s, requester, now)?;
                Ok(s.clone())
            })
            .await?;
        let handle = self.registry.handle(&session.id).await?;
        self.start_genre_timer(handle.scheduler(), &session.id, session.state_entered_at);
        self.publish(vec![session_updated(&session, now)]);
        Ok(CommandOutcome::bound(session, requester))
    }

    pub async fn submit_genre_votes(
        &self,
        session_id: &str,
        user_id: &str,
        genres: &[String],
    ) -> CrowdjamResult<CommandOutcome> {
        let now = now_millis();
        let per_participant = self.config.genre_votes_per_participant;
        let (id, events) = self
            .registry
            .with_session(session_id, |s| {
                if s.state != SessionState::GenreVoting {
                    return Err(CrowdjamError::InvalidRequest(
                        "genre votes are only accepted during genre voting".to_string(),
                    ));
                }
                let outcome = vote_ledger::add_genre_votes(s, user_id, genres, per_participant)?;
                let mut events = vec![genre_results(s, now)];
                if outcome.quota_reached {
                    log::info!(
                        "[Engine] Session {} genre quota reached ({}/{})",
                        s.id,
                        outcome.total_votes,
                        outcome.quota
                    );
                    lifecycle::begin_song_voting(s, now);
                    events.push(session_updated(s, now));
                }
                Ok((s.id.clone(), events))
            })
            .await?;
        self.publish(events);
        Ok(CommandOutcome::ack(&id))
    }

    /// Closes the genre vote started at `epoch` if its window has run out.
    ///
    /// Returns whether the vote was closed by this call.
    pub async fn close_genre_vote(
        &self,
        session_id: &str,
        epoch: u64,
        now: u64,
    ) -> CrowdjamResult<bool> {
        let window_ms = self.config.genre_voting_window_secs * 1000;
        let closed = self
            .registry
            .with_session(session_id, |s| {
                let current = s.state_entered_at == epoch;
                if current && lifecycle::genre_window_elapsed(s, window_ms, now) {
                    log::info!("[Engine] Session {} genre window elapsed", s.id);
                    lifecycle::begin_song_voting(s, now);
                    return Ok(Some(session_updated(s, now)));
                }
                Ok(None)
            })
            .await?;
        let was_closed = closed.is_some();
        self.publish(closed.into_iter().collect());
        Ok(was_closed)
    }

    async fn genre_countdown(&self, session_id: &str, epoch: u64, now: u64) -> ControlFlow<()> {
        let open = self
            .registry
            .read(session_id, |s| {
                s.state == SessionState::GenreVoting && s.state_entered_at == epoch
            })
            .await;
        if !matches!(open, Ok(true)) {
            return ControlFlow::Break(());
        }

        let window_ms = self.config.genre_voting_window_secs * 1000;
        let remaining_ms = window_ms.saturating_sub(now.saturating_sub(epoch));
        self.emitter.emit_round(RoundEvent::VotingTimeUpdate {
            session_id: session_id.to_string(),
            seconds_remaining: remaining_ms.div_ceil(1000),
            timestamp: now,
        });
        if remaining_ms > 0 {
            return ControlFlow::Continue(());
        }
        if let Err(e) = self.close_genre_vote(session_id, epoch, now).await {
            log::warn!("[Engine] Failed to close genre vote for {}: {}", session_id, e);
        }
        ControlFlow::Break(())
    }

    fn start_genre_timer(self: &Arc<Self>, scheduler: &SessionScheduler, session_id: &str, epoch: u64) {
        let engine = Arc::clone(self);
        let session_id = session_id.to_string();
        scheduler.spawn_interval("genre-countdown", Duration::from_secs(1), move || {
            let engine = Arc::clone(&engine);
            let session_id = session_id.clone();
            async move { engine.genre_countdown(&session_id, epoch, now_millis()).await }
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Song rounds
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn submit_song_suggestion(
        &self,
        session_id: &str,
        user_id: &str,
        song: Song,
    ) -> CrowdjamResult<CommandOutcome> {
        let now = now_millis();
        let (id, event) = self
            .registry
            .with_session(session_id, |s| {
                queue::suggest(s, user_id, song, now)?;
                Ok((s.id.clone(), suggestions_updated(s, now)))
            })
            .await?;
        self.publish(vec![event]);
        Ok(CommandOutcome::ack(&id))
    }

    pub async fn submit_song_vote(
        self: &Arc<Self>,
        session_id: &str,
        user_id: &str,
        song_id: &str,
    ) -> CrowdjamResult<CommandOutcome> {
        let now = now_millis();
        let (id, settlement) = self
            .registry
            .with_session(session_id, |s| {
                vote_ledger::add_song_vote(s, user_id, song_id)?;
                let mut out = Settlement::default();
                out.events.push(suggestions_updated(s, now));
                if s.state == SessionState::SongVoting && lifecycle::song_quota_reached(s) {
                    log::info!("[Engine] Session {} song vote quota reached", s.id);
                    let advance = phase_clock::close_round(s, now, &mut *self.rng.lock());
                    self.settle(s, advance, now, &mut out);
                }
                Ok((s.id.clone(), out))
            })
            .await?;
        self.finish(&id, settlement).await;
        Ok(CommandOutcome::ack(&id))
    }

    async fn ensure_ticker(self: &Arc<Self>, session_id: &str) -> CrowdjamResult<()> {
        let handle = self.registry.handle(session_id).await?;
        if handle.claim_ticker() {
            self.start_ticker(handle.scheduler(), session_id);
        }
        Ok(())
    }

    fn start_ticker(self: &Arc<Self>, scheduler: &SessionScheduler, session_id: &str) {
        let engine = Arc::clone(self);
        let session_id = session_id.to_string();
        let period = Duration::from_millis(self.config.tick_interval_ms);
        scheduler.spawn_interval("tick", period, move || {
            let engine = Arc::clone(&engine);
            let session_id = session_id.clone();
            async move {
                match engine.tick(&session_id, now_millis()).await {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(CrowdjamError::NotFound(_)) => ControlFlow::Break(()),
                    Err(e) => {
                        log::warn!("[Engine] Tick failed for session {}: {}", session_id, e);
                        ControlFlow::Continue(())
                    }
                }
            }
        });
    }

    /// Advances a session's round from the current playback position.
    ///
    /// In SONG_VOTING the round runs on a synthetic clock. In PLAYING the
    /// host player's position is fetched first, outside the session lock;
    /// when that fails the last known position is extrapolated.
    pub async fn tick(self: &Arc<Self>, session_id: &str, now: u64) -> CrowdjamResult<()> {
        let (state, entered_at, host_id, last) = self
            .registry
            .read(session_id, |s| {
                (
                    s.state,
                    s.state_entered_at,
                    s.host_id.clone(),
                    s.last_progress.clone(),
                )
            })
            .await?;

        let observed = match state {
            SessionState::SongVoting => None,
            SessionState::Playing => {
                let music = &self.music;
                let host = host_id.as_str();
                match with_retry("playback_progress", || music.playback_progress(host)).await {
                    Ok(Some(progress)) => Some((progress, true)),
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        log::warn!(
                            "[Engine] Playback progress unavailable for {}: {}",
                            session_id,
                            e
                        );
                        match last {
                            Some(last) => Some((last.extrapolate(now), false)),
                            None => return Ok(()),
                        }
                    }
                }
            }
            // Backstop for a genre vote whose countdown is not running.
            SessionState::GenreVoting => {
                self.close_genre_vote(session_id, entered_at, now).await?;
                return Ok(());
            }
            SessionState::Waiting => return Ok(()),
        };

        let (id, settlement) = self
            .registry
            .with_session(session_id, |s| {
                let out = self.apply_tick(s, state, observed, now);
                Ok((s.id.clone(), out))
            })
            .await?;
        self.finish(&id, settlement).await;
        Ok(())
    }

    fn apply_tick(
        &self,
        s: &mut Session,
        expected: SessionState,
        observed: Option<(PlaybackProgress, bool)>,
        now: u64,
    ) -> Settlement {
        let mut out = Settlement::default();
        if s.state != expected {
            return out;
        }
        let progress = match expected {
            SessionState::SongVoting => {
                lifecycle::song_round_progress(s, self.config.song_round_ms, now)
            }
            SessionState::Playing => {
                let Some((progress, fresh)) = observed else {
                    return out;
                };
                match lifecycle::observe_track(s, &progress, now) {
                    TrackObservation::Current => {}
                    TrackObservation::Advanced(entry) => {
                        log::info!("[Engine] Session {} now playing {}", s.id, entry.song.name);
                        out.events.push(queue_updated(s, now));
                    }
                    TrackObservation::Foreign => return out,
                }
                if fresh {
                    s.last_progress = Some(ObservedProgress {
                        progress: progress.clone(),
                        observed_at: now,
                    });
                }
                if !progress.is_playing {
                    return out;
                }
                progress
            }
            SessionState::Waiting | SessionState::GenreVoting => return out,
        };

        let advance = phase_clock::advance(
            s,
            progress.progress_ms,
            progress.duration_ms,
            now,
            &mut *self.rng.lock(),
        );
        self.settle(s, advance, now, &mut out);
        out
    }

    /// Turns a phase advance into events and lifecycle consequences.
    fn settle(&self, s: &mut Session, advance: PhaseAdvance, now: u64, out: &mut Settlement) {
        for phase in &advance.entered {
            let time_remaining_ms = if s.phase == Some(*phase) {
                phase_clock::time_remaining(s, now)
            } else {
                0
            };
            out.events.push(BroadcastEvent::Round(RoundEvent::PhaseUpdate {
                session_id: s.id.clone(),
                phase: *phase,
                round: s.round,
                time_remaining_ms,
                winner: match phase {
                    Phase::Locked => advance.winner.clone(),
                    _ => None,
                },
                timestamp: now,
            }));
        }
        if advance.entered(Phase::Suggestion) {
            out.recommend |= self.wants_recommendations(s);
        }
        if advance.entered(Phase::Voting) {
            out.events.push(suggestions_updated(s, now));
        }
        if advance.winner_enqueued {
            out.events.push(queue_updated(s, now));
        }
        if !advance.entered(Phase::Locked) {
            return;
        }

        let closure = lifecycle::on_round_locked(s, now);
        if let Some(first) = &closure.started_playback {
            out.events.push(BroadcastEvent::Queue(QueueEvent::PlayTrack {
                session_id: s.id.clone(),
                uri: first.song.uri.clone(),
                position_ms: 0,
                timestamp: now,
            }));
        }
        if let Some(next) = &closure.up_next {
            out.enqueue = Some((s.host_id.clone(), next.song.uri.clone()));
        }
        if closure.reentered_genre_voting {
            out.genre_timer = Some(s.state_entered_at);
        }
        if closure.restarted_round {
            out.recommend |= self.wants_recommendations(s);
        }
        if closure != RoundClosure::default() {
            out.events.push(queue_updated(s, now));
            out.events.push(session_updated(s, now));
        }
    }

    fn wants_recommendations(&self, s: &Session) -> bool {
        self.config.auto_recommend_below > 0 && s.queue.len() < self.config.auto_recommend_below
    }

    /// Broadcasts a settlement's events, then performs its side effects.
    async fn finish(self: &Arc<Self>, session_id: &str, settlement: Settlement) {
        self.publish(settlement.events);

        if let Some((host_id, uri)) = settlement.enqueue {
            let music = &self.music;
            let result =
                with_retry("enqueue_track", || music.enqueue_track(&host_id, &uri)).await;
            if let Err(e) = result {
                log::warn!(
                    "[Engine] Could not hand {} to the host player of {}: {}",
                    uri,
                    session_id,
                    e
                );
            }
        }

        if settlement.genre_timer.is_some() || settlement.recommend {
            let handle = match self.registry.handle(session_id).await {
                Ok(handle) => handle,
                Err(_) => return,
            };
            if let Some(epoch) = settlement.genre_timer {
                self.start_genre_timer(handle.scheduler(), session_id, epoch);
            }
            if settlement.recommend {
                let engine = Arc::clone(self);
                let session_id = session_id.to_string();
                handle
                    .scheduler()
                    .spawn_after("recommendations", Duration::ZERO, async move {
                        if let Err(e) = engine.recommend(&session_id).await {
                            log::warn!(
                                "[Engine] Automatic recommendations skipped for {}: {}",
                                session_id,
                                e
                            );
                        }
                    });
            }
        }
    }

    fn publish(&self, events: Vec<BroadcastEvent>) {
        for event in events {
            match event {
                BroadcastEvent::Session(e) => self.emitter.emit_session(e),
                BroadcastEvent::Round(e) => self.emitter.emit_round(e),
                BroadcastEvent::Queue(e) => self.emitter.emit_queue(e),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gateways
    // ─────────────────────────────────────────────────────────────────────────

    /// Requests AI recommendations and merges them into the queue.
    ///
    /// Returns the number of entries added.
    pub async fn recommend(&self, session_id: &str) -> CrowdjamResult<usize> {
        let request = self
            .registry
            .read(session_id, |s| RecommendationRequest {
                session_id: s.id.clone(),
                top_genres: vote_ledger::top_genres(s, MAX_GENRES_PER_BALLOT),
                recent_tracks: queue::recent_tracks(s),
            })
            .await?;
        let recommender = &self.recommender;
        let candidates =
            with_retry("recommendations", || recommender.suggest(&request)).await?;

        let now = now_millis();
        let (added, event) = self
            .registry
            .with_session(session_id, |s| {
                let added = queue::merge_recommendations(s, &candidates, now);
                Ok((added, queue_updated(s, now)))
            })
            .await?;
        log::info!(
            "[Engine] Merged {} of {} recommendations into {}",
            added,
            candidates.len(),
            request.session_id
        );
        if added > 0 {
            self.publish(vec![event]);
        }
        Ok(added)
    }

    /// Searches the catalog with the session host's account.
    pub async fn search(&self, session_id: &str, query: &str) -> CrowdjamResult<Vec<Song>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CrowdjamError::InvalidRequest(
                "search query must not be empty".to_string(),
            ));
        }
        let host_id = self.registry.read(session_id, |s| s.host_id.clone()).await?;
        let music = &self.music;
        Ok(with_retry("search", || music.search(&host_id, query)).await?)
    }
}
