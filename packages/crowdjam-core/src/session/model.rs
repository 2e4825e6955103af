//! Session domain types.
//!
//! Everything here is plain data. The rules that mutate a [`Session`] live in
//! the sibling modules (`vote_ledger`, `queue`, `phase_clock`, `lifecycle`),
//! and the registry serializes access to each session.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Top-level state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created, waiting for the host to start.
    #[default]
    Waiting,
    /// Participants are voting on genres.
    GenreVoting,
    /// First song round, before anything is playing.
    SongVoting,
    /// A track is playing and rounds follow its progress.
    Playing,
}

/// Phase of a voting round.
///
/// Ordered so that a phase can be compared against the next one: a round only
/// ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Participants propose songs.
    Suggestion,
    /// Participants vote among the frozen suggestions.
    Voting,
    /// Voting is closed and the winner is decided.
    Locked,
}

impl Phase {
    /// The phase that follows this one within a round.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Suggestion => Some(Self::Voting),
            Self::Voting => Some(Self::Locked),
            Self::Locked => None,
        }
    }
}

/// A member of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub user_name: String,
    pub is_host: bool,
    pub connected: bool,
}

/// Track metadata as reported by the music service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub name: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    pub uri: String,
}

/// A song inside a session: a suggestion, a ballot option or a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongEntry {
    #[serde(flatten)]
    pub song: Song,
    /// Participant id, or `"AI"` for recommendation entries.
    pub added_by: String,
    pub added_at: u64,
    pub votes: u32,
    #[serde(default)]
    pub voters: BTreeSet<String>,
}

impl SongEntry {
    /// Creates an entry with no votes.
    pub fn new(song: Song, added_by: impl Into<String>, added_at: u64) -> Self {
        Self {
            song,
            added_by: added_by.into(),
            added_at,
            votes: 0,
            voters: BTreeSet::new(),
        }
    }

    /// Song id shorthand.
    pub fn id(&self) -> &str {
        &self.song.id
    }
}

/// Votes received by one genre.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreTally {
    pub genre: String,
    pub votes: u32,
}

/// A recommendation candidate with the service's confidence (0..=100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub song: Song,
    pub confidence: f32,
}

/// Playback position of the host's player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackProgress {
    pub track_id: String,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
}

/// A [`PlaybackProgress`] together with the time it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedProgress {
    #[serde(flatten)]
    pub progress: PlaybackProgress,
    pub observed_at: u64,
}

impl ObservedProgress {
    /// Estimates the progress at `now`, assuming playback continued.
    pub fn extrapolate(&self, now: u64) -> PlaybackProgress {
        let mut progress = self.progress.clone();
        if progress.is_playing {
            let elapsed = now.saturating_sub(self.observed_at);
            progress.progress_ms = progress
                .progress_ms
                .saturating_add(elapsed)
                .min(progress.duration_ms);
        }
        progress
    }
}

/// A collaborative listening session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub host_id: String,
    pub participants: Vec<Participant>,
    pub state: SessionState,
    pub state_entered_at: u64,
    pub created_at: u64,

    // Round
    pub phase: Option<Phase>,
    pub phase_started_at: u64,
    /// Duration of the track the current round is clocked against.
    pub round_duration_ms: u64,
    pub round: u64,

    // Genre vote
    /// Tallies in first-nominated order.
    pub genre_tally: Vec<GenreTally>,
    pub genre_voters: BTreeSet<String>,

    // Suggestions and song votes
    /// Suggestions of the current round, keyed by participant.
    pub suggestions: BTreeMap<String, SongEntry>,
    /// Ballot frozen when VOTING begins, one option per song id.
    pub votable_options: Vec<SongEntry>,
    /// Song id -> participants currently voting for it.
    pub votes: BTreeMap<String, BTreeSet<String>>,
    pub winner: Option<SongEntry>,
    pub winner_enqueued: bool,

    // Playback
    pub queue: Vec<SongEntry>,
    pub current_song: Option<SongEntry>,
    pub up_next: Option<SongEntry>,
    pub last_progress: Option<ObservedProgress>,

    /// Bumped each time the host disconnects; grace timers check it.
    #[serde(default)]
    pub host_departures: u64,
}

impl Session {
    /// Creates a WAITING session whose only participant is the host.
    pub fn new(
        id: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
        now: u64,
    ) -> Self {
        let host_id = host_id.into();
        Self {
            id: id.into(),
            participants: vec![Participant {
                user_id: host_id.clone(),
                user_name: host_name.into(),
                is_host: true,
                connected: true,
            }],
            host_id,
            state: SessionState::Waiting,
            state_entered_at: now,
            created_at: now,
            phase: None,
            phase_started_at: now,
            round_duration_ms: 0,
            round: 0,
            genre_tally: Vec::new(),
            genre_voters: BTreeSet::new(),
            suggestions: BTreeMap::new(),
            votable_options: Vec::new(),
            votes: BTreeMap::new(),
            winner: None,
            winner_enqueued: false,
            queue: Vec::new(),
            current_song: None,
            up_next: None,
            last_progress: None,
            host_departures: 0,
        }
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id == user_id
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn connected_count(&self) -> usize {
        self.participants.iter().filter(|p| p.connected).count()
    }

    /// Adds a participant, or marks an existing one as connected again.
    ///
    /// Returns `true` when the participant is new.
    pub fn add_participant(&mut self, user_id: &str, user_name: &str) -> bool {
        if let Some(existing) = self.participants.iter_mut().find(|p| p.user_id == user_id) {
            existing.connected = true;
            return false;
        }
        self.participants.push(Participant {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            is_host: user_id == self.host_id,
            connected: true,
        });
        true
    }

    /// Removes a non-host participant, or marks the host as disconnected.
    ///
    /// The host always stays in the participant list so the session keeps
    /// its owner while the disconnect policy runs.
    pub fn remove_participant(&mut self, user_id: &str) -> bool {
        if self.is_host(user_id) {
            return match self.participants.iter_mut().find(|p| p.user_id == user_id) {
                Some(host) => {
                    host.connected = false;
                    self.host_departures += 1;
                    true
                }
                None => false,
            };
        }
        let before = self.participants.len();
        self.participants.retain(|p| p.user_id != user_id);
        before != self.participants.len()
    }

    pub fn votable_option(&self, song_id: &str) -> Option<&SongEntry> {
        self.votable_options.iter().find(|e| e.id() == song_id)
    }

    /// Moves the session to `state`.
    pub fn enter_state(&mut self, state: SessionState, now: u64) {
        self.state = state;
        self.state_entered_at = now;
    }

    /// Starts a new round. The first tick will enter SUGGESTION.
    pub fn begin_round(&mut self, now: u64) {
        self.round += 1;
        self.phase = None;
        self.phase_started_at = now;
    }

    /// Whether `song_id` is already queued, playing or up next.
    pub fn holds_song(&self, song_id: &str) -> bool {
        self.queue.iter().any(|e| e.id() == song_id)
            || self.current_song.as_ref().is_some_and(|e| e.id() == song_id)
            || self.up_next.as_ref().is_some_and(|e| e.id() == song_id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn song(id: &str) -> Song {
        Song {
            id: id.to_string(),
            name: format!("Song {}", id),
            artist: "Artist".to_string(),
            album_art: None,
            duration_ms: 180_000,
            uri: format!("spotify:track:{}", id),
        }
    }

    pub fn entry(id: &str, votes: u32) -> SongEntry {
        let mut entry = SongEntry::new(song(id), "u1", 0);
        entry.votes = votes;
        entry
    }

    /// Session `ABCD` hosted by `host` with the given extra participants.
    pub fn session_with(users: &[&str]) -> Session {
        let mut session = Session::new("ABCD", "host", "Host", 0);
        for user in users {
            session.add_participant(user, user);
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn re_join_keeps_a_single_participant() {
        let mut session = session_with(&["alice"]);
        assert!(!session.add_participant("alice", "Alice again"));
        assert_eq!(session.participant_count(), 2);
        assert!(!session.add_participant("host", "Host"));
        assert_eq!(session.participant_count(), 2);
    }

    #[test]
    fn host_leave_marks_disconnected_but_keeps_owner() {
        let mut session = session_with(&["alice"]);
        assert!(session.remove_participant("host"));
        assert_eq!(session.participant_count(), 2);
        assert_eq!(session.connected_count(), 1);
        assert_eq!(session.host_departures, 1);

        assert!(session.remove_participant("alice"));
        assert_eq!(session.participant_count(), 1);
        assert!(!session.remove_participant("alice"));
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Suggestion < Phase::Voting);
        assert!(Phase::Voting < Phase::Locked);
        assert_eq!(Phase::Locked.next(), None);
    }

    #[test]
    fn extrapolation_advances_only_while_playing() {
        let observed = ObservedProgress {
            progress: PlaybackProgress {
                track_id: "t".into(),
                progress_ms: 1_000,
                duration_ms: 5_000,
                is_playing: true,
            },
            observed_at: 10_000,
        };
        assert_eq!(observed.extrapolate(12_000).progress_ms, 3_000);
        assert_eq!(observed.extrapolate(99_000).progress_ms, 5_000);

        let paused = ObservedProgress {
            progress: PlaybackProgress {
                is_playing: false,
                ..observed.progress.clone()
            },
            ..observed
        };
        assert_eq!(paused.extrapolate(12_000).progress_ms, 1_000);
    }

    #[test]
    fn song_entry_serializes_flat() {
        let json = serde_json::to_value(entry("t1", 2)).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["votes"], 2);
        assert_eq!(json["durationMs"], 180_000);
    }
}
