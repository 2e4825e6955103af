//! Session domain: the model and the rules that act on it.
//!
//! # Module Structure
//!
//! - `model` - Session, participant, song and progress types
//! - `vote_ledger` - Genre ballots, song votes and tie resolution
//! - `queue` - Suggestions, the shared queue and recommendation merging
//! - `phase_clock` - Progress-driven SUGGESTION/VOTING/LOCKED phases
//! - `lifecycle` - Session state machine
//!
//! Functions here are synchronous and operate on a `&mut Session` held under
//! the registry's per-session lock.

pub mod lifecycle;
pub mod model;
pub mod phase_clock;
pub mod queue;
pub mod vote_ledger;

pub use lifecycle::{RoundClosure, TrackObservation};
pub use model::{
    GenreTally, ObservedProgress, Participant, Phase, PlaybackProgress, RankedCandidate, Session,
    SessionState, Song, SongEntry,
};
pub use phase_clock::PhaseAdvance;
pub use vote_ledger::{GenreBallotOutcome, VoteCount};
