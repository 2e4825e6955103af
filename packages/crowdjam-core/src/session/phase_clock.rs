//! Derives round phases from track progress.
//!
//! A round is clocked against one track of `duration` ms:
//!
//! | progress                        | phase      |
//! |---------------------------------|------------|
//! | `< duration / 2`                | SUGGESTION |
//! | `< duration - LOCK_WINDOW_MS`   | VOTING     |
//! | otherwise                       | LOCKED     |
//!
//! Phases only move forward within a round and never skip an edge: a tick
//! that jumps from SUGGESTION straight into the lock window still runs the
//! VOTING edge first.

use rand::Rng;

use crate::protocol_constants::LOCK_WINDOW_MS;
use crate::session::model::{Phase, Session, SongEntry};
use crate::session::{queue, vote_ledger};

/// What a tick did to the round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseAdvance {
    /// Phases entered by this tick, in order.
    pub entered: Vec<Phase>,
    /// Winner decided when LOCKED was entered.
    pub winner: Option<SongEntry>,
    /// Whether the winner was appended to the queue by this tick.
    pub winner_enqueued: bool,
}

impl PhaseAdvance {
    pub fn entered(&self, phase: Phase) -> bool {
        self.entered.contains(&phase)
    }

    pub fn is_empty(&self) -> bool {
        self.entered.is_empty()
    }
}

/// Phase for a progress point within a track.
pub fn derive_phase(progress_ms: u64, duration_ms: u64) -> Phase {
    let (_, voting_start, lock_start) = boundaries(duration_ms);
    if progress_ms < voting_start {
        Phase::Suggestion
    } else if progress_ms < lock_start {
        Phase::Voting
    } else {
        Phase::Locked
    }
}

/// `(suggestion, voting, locked)` start offsets. Short tracks have no
/// VOTING span: LOCKED starts at the midpoint.
fn boundaries(duration_ms: u64) -> (u64, u64, u64) {
    let half = duration_ms / 2;
    let lock = duration_ms.saturating_sub(LOCK_WINDOW_MS).max(half);
    (0, half, lock)
}

/// Start and end progress offsets of `phase`.
pub fn phase_span(phase: Phase, duration_ms: u64) -> (u64, u64) {
    let (suggestion, voting, locked) = boundaries(duration_ms);
    match phase {
        Phase::Suggestion => (suggestion, voting),
        Phase::Voting => (voting, locked),
        Phase::Locked => (locked, duration_ms),
    }
}

/// Milliseconds left in the session's current phase at `now`.
pub fn time_remaining(session: &Session, now: u64) -> u64 {
    let Some(phase) = session.phase else {
        return 0;
    };
    let (start, end) = phase_span(phase, session.round_duration_ms);
    let elapsed = now.saturating_sub(session.phase_started_at);
    (end - start).saturating_sub(elapsed)
}

/// Advances the round to the phase implied by `progress_ms`.
///
/// Ticks that would move the phase backwards (a seek, a stale report) are
/// ignored. A zero `duration_ms` carries no information and is ignored too.
pub fn advance<R: Rng + ?Sized>(
    session: &mut Session,
    progress_ms: u64,
    duration_ms: u64,
    now: u64,
    rng: &mut R,
) -> PhaseAdvance {
    if duration_ms == 0 {
        return PhaseAdvance::default();
    }
    let target = derive_phase(progress_ms, duration_ms);
    if session.phase.is_some_and(|current| target <= current) {
        return PhaseAdvance::default();
    }

    session.round_duration_ms = duration_ms;
    let outcome = step_to(session, target, now, rng);
    let (start, _) = phase_span(target, duration_ms);
    session.phase_started_at = now.saturating_sub(progress_ms.saturating_sub(start));
    outcome
}

/// Forces the round into LOCKED now, running every edge still pending.
pub fn close_round<R: Rng + ?Sized>(session: &mut Session, now: u64, rng: &mut R) -> PhaseAdvance {
    if session.phase == Some(Phase::Locked) {
        return PhaseAdvance::default();
    }
    let outcome = step_to(session, Phase::Locked, now, rng);
    session.phase_started_at = now;
    outcome
}

fn step_to<R: Rng + ?Sized>(
    session: &mut Session,
    target: Phase,
    now: u64,
    rng: &mut R,
) -> PhaseAdvance {
    let mut outcome = PhaseAdvance::default();
    let mut next = match session.phase {
        None => Some(Phase::Suggestion),
        Some(current) => current.next(),
    };
    while let Some(phase) = next.filter(|p| *p <= target) {
        enter(session, phase, now, rng, &mut outcome);
        outcome.entered.push(phase);
        next = phase.next();
    }
    outcome
}

fn enter<R: Rng + ?Sized>(
    session: &mut Session,
    phase: Phase,
    now: u64,
    rng: &mut R,
    outcome: &mut PhaseAdvance,
) {
    session.phase = Some(phase);
    session.phase_started_at = now;
    match phase {
        Phase::Suggestion => {
            session.suggestions.clear();
            session.votable_options.clear();
            session.votes.clear();
            session.winner = None;
            session.winner_enqueued = false;
        }
        Phase::Voting => {
            session.votable_options = queue::freeze_ballot(session);
            session.suggestions.clear();
        }
        Phase::Locked => {
            session.winner = vote_ledger::resolve_tie(session, rng);
            if let Some(winner) = session.winner.clone() {
                if !session.winner_enqueued {
                    queue::enqueue_winner(session, &winner, now);
                    session.winner_enqueued = true;
                    outcome.winner_enqueued = true;
                }
                outcome.winner = Some(winner);
            }
            log::info!(
                "[Round] Session {} round {} locked, winner: {}",
                session.id,
                session.round,
                session
                    .winner
                    .as_ref()
                    .map_or("none", |w| w.song.name.as_str())
            );
        }
    }
}
