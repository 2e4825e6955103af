//! Session state machine: WAITING → GENRE_VOTING → SONG_VOTING → PLAYING.
//!
//! PLAYING falls back to GENRE_VOTING when a round locks with nothing left to
//! play next.

use crate::error::{CrowdjamError, CrowdjamResult};
use crate::session::model::{PlaybackProgress, Session, SessionState, SongEntry};
use crate::session::{queue, vote_ledger};

/// What the lifecycle did after a round locked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundClosure {
    /// First track of the session, started when SONG_VOTING ends.
    pub started_playback: Option<SongEntry>,
    /// Track handed to the music service to play after the current one.
    pub up_next: Option<SongEntry>,
    /// The queue ran dry and the session went back to genre voting.
    pub reentered_genre_voting: bool,
    /// SONG_VOTING closed without a winner and a new round began.
    pub restarted_round: bool,
}

/// How a progress report relates to the session's current song.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackObservation {
    /// The report is for the current song.
    Current,
    /// The player moved on to `up_next`, which is now the current song.
    Advanced(SongEntry),
    /// The report is for an unrelated track.
    Foreign,
}

/// Starts the genre vote. Host only, from WAITING.
pub fn start(session: &mut Session, requester: &str, now: u64) -> CrowdjamResult<()> {
    if !session.is_host(requester) {
        return Err(CrowdjamError::Forbidden(
            "only the host can start the session".to_string(),
        ));
    }
    if session.state != SessionState::Waiting {
        return Err(CrowdjamError::InvalidRequest(format!(
            "session {} has already started",
            session.id
        )));
    }
    begin_genre_voting(session, now);
    Ok(())
}

/// Opens a fresh genre vote.
pub fn begin_genre_voting(session: &mut Session, now: u64) {
    session.genre_tally.clear();
    session.genre_voters.clear();
    session.current_song = None;
    session.up_next = None;
    session.last_progress = None;
    session.phase = None;
    session.winner = None;
    session.winner_enqueued = false;
    session.suggestions.clear();
    session.votable_options.clear();
    session.votes.clear();
    session.enter_state(SessionState::GenreVoting, now);
    log::info!("[Session] {} entered genre voting", session.id);
}

/// Ends the genre vote and opens the first song round.
pub fn begin_song_voting(session: &mut Session, now: u64) {
    session.enter_state(SessionState::SongVoting, now);
    session.begin_round(now);
    log::info!(
        "[Session] {} entered song voting (top genres: {:?})",
        session.id,
        vote_ledger::top_genres(session, 3)
    );
}

/// Whether the genre vote has run for its full window.
pub fn genre_window_elapsed(session: &Session, window_ms: u64, now: u64) -> bool {
    session.state == SessionState::GenreVoting
        && now.saturating_sub(session.state_entered_at) >= window_ms
}

/// Whether every participant holds a song vote.
pub fn song_quota_reached(session: &Session) -> bool {
    let participants = session.participant_count();
    participants > 0 && vote_ledger::distinct_voters(session) >= participants
}

/// Synthetic progress for SONG_VOTING, where nothing is playing yet.
pub fn song_round_progress(session: &Session, round_ms: u64, now: u64) -> PlaybackProgress {
    PlaybackProgress {
        track_id: format!("round-{}", session.round),
        progress_ms: now.saturating_sub(session.state_entered_at),
        duration_ms: round_ms,
        is_playing: true,
    }
}

/// Applies the lifecycle consequences of a round reaching LOCKED.
pub fn on_round_locked(session: &mut Session, now: u64) -> RoundClosure {
    let mut closure = RoundClosure::default();
    match session.state {
        SessionState::SongVoting => {
            queue::close_round(session);
            match queue::dequeue_next(session) {
                Ok(first) => {
                    session.current_song = Some(first.clone());
                    session.enter_state(SessionState::Playing, now);
                    session.begin_round(now);
                    log::info!(
                        "[Session] {} started playback with {}",
                        session.id,
                        first.song.name
                    );
                    closure.started_playback = Some(first);
                }
                Err(_) => {
                    log::info!(
                        "[Session] {} song round closed without a winner, restarting",
                        session.id
                    );
                    begin_song_voting(session, now);
                    closure.restarted_round = true;
                }
            }
        }
        SessionState::Playing => {
            if session.up_next.is_some() {
                return closure;
            }
            queue::close_round(session);
            match queue::dequeue_next(session) {
                Ok(next) => {
                    session.up_next = Some(next.clone());
                    closure.up_next = Some(next);
                }
                Err(_) => {
                    begin_genre_voting(session, now);
                    closure.reentered_genre_voting = true;
                }
            }
        }
        SessionState::Waiting | SessionState::GenreVoting => {}
    }
    closure
}

/// Matches a progress report against the current song, promoting `up_next`
/// when the player has moved on to it.
pub fn observe_track(
    session: &mut Session,
    progress: &PlaybackProgress,
    now: u64,
) -> TrackObservation {
    if session
        .current_song
        .as_ref()
        .is_some_and(|c| c.id() == progress.track_id)
    {
        return TrackObservation::Current;
    }
    let Some(next) = session.up_next.take() else {
        return TrackObservation::Foreign;
    };
    if next.id() != progress.track_id {
        log::info!(
            "[Session] {} player moved to unexpected track {}, treating it as {}",
            session.id,
            progress.track_id,
            next.song.name
        );
    }
    session.current_song = Some(next.clone());
    session.begin_round(now);
    TrackObservation::Advanced(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::fixtures::{entry, session_with};
    use crate::session::model::Phase;

    fn progress(track: &str, at: u64) -> PlaybackProgress {
        PlaybackProgress {
            track_id: track.to_string(),
            progress_ms: at,
            duration_ms: 180_000,
            is_playing: true,
        }
    }

    #[test]
    fn only_host_starts_and_only_once() {
        let mut session = session_with(&["alice"]);
        assert_eq!(start(&mut session, "alice", 5).unwrap_err().code(), "forbidden");
        start(&mut session, "host", 5).unwrap();
        assert_eq!(session.state, SessionState::GenreVoting);
        assert_eq!(session.state_entered_at, 5);
        assert_eq!(
            start(&mut session, "host", 6).unwrap_err().code(),
            "invalid_request"
        );
    }

    #[test]
    fn genre_window_closes_after_its_length() {
        let mut session = session_with(&[]);
        start(&mut session, "host", 1_000).unwrap();
        assert!(!genre_window_elapsed(&session, 30_000, 30_999));
        assert!(genre_window_elapsed(&session, 30_000, 31_000));
    }

    #[test]
    fn song_voting_lock_starts_playback_with_top_entry() {
        let mut session = session_with(&[]);
        begin_song_voting(&mut session, 0);
        session.queue = vec![entry("low", 1), entry("high", 4)];
        session.phase = Some(Phase::Locked);

        let closure = on_round_locked(&mut session, 10);
        assert_eq!(closure.started_playback.unwrap().id(), "high");
        assert_eq!(session.state, SessionState::Playing);
        assert_eq!(session.current_song.as_ref().unwrap().id(), "high");
        assert_eq!(session.phase, None);
        assert_eq!(session.queue.len(), 1);
    }

    #[test]
    fn song_voting_without_queue_restarts_round() {
        let mut session = session_with(&[]);
        begin_song_voting(&mut session, 0);
        let round = session.round;
        let closure = on_round_locked(&mut session, 50);
        assert!(closure.restarted_round);
        assert_eq!(session.state, SessionState::SongVoting);
        assert_eq!(session.round, round + 1);
        assert_eq!(session.state_entered_at, 50);
    }

    #[test]
    fn empty_queue_while_playing_returns_to_genre_voting() {
        let mut session = session_with(&[]);
        session.enter_state(SessionState::Playing, 0);
        session.current_song = Some(entry("now", 0));
        session.genre_voters.insert("host".into());

        let closure = on_round_locked(&mut session, 99);
        assert!(closure.reentered_genre_voting);
        assert_eq!(session.state, SessionState::GenreVoting);
        assert!(session.current_song.is_none());
        assert!(session.genre_voters.is_empty());
    }

    #[test]
    fn playing_lock_sets_up_next() {
        let mut session = session_with(&[]);
        session.enter_state(SessionState::Playing, 0);
        session.current_song = Some(entry("now", 0));
        session.queue = vec![entry("a", 0), entry("b", 2)];

        let closure = on_round_locked(&mut session, 99);
        assert_eq!(closure.up_next.unwrap().id(), "b");
        assert_eq!(session.up_next.as_ref().unwrap().id(), "b");
    }

    #[test]
    fn track_change_promotes_up_next_and_starts_round() {
        let mut session = session_with(&[]);
        session.enter_state(SessionState::Playing, 0);
        session.current_song = Some(entry("now", 0));
        session.up_next = Some(entry("next", 0));
        let round = session.round;

        assert_eq!(
            observe_track(&mut session, &progress("now", 1_000), 1),
            TrackObservation::Current
        );
        match observe_track(&mut session, &progress("next", 0), 2) {
            TrackObservation::Advanced(entry) => assert_eq!(entry.id(), "next"),
            other => panic!("unexpected observation: {:?}", other),
        }
        assert_eq!(session.current_song.as_ref().unwrap().id(), "next");
        assert!(session.up_next.is_none());
        assert_eq!(session.round, round + 1);

        assert_eq!(
            observe_track(&mut session, &progress("other", 0), 3),
            TrackObservation::Foreign
        );
    }

    #[test]
    fn song_quota_needs_every_participant() {
        let mut session = session_with(&["alice"]);
        session.votes.entry("s1".into()).or_default().insert("alice".into());
        assert!(!song_quota_reached(&session));
        session.votes.entry("s2".into()).or_default().insert("host".into());
        assert!(song_quota_reached(&session));
    }
}
