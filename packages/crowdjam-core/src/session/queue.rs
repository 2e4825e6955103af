//! Suggestions, the shared queue and recommendation merging.

use std::collections::HashSet;

use crate::error::{CrowdjamError, CrowdjamResult};
use crate::protocol_constants::{AI_ADDED_BY, AI_CONFIDENCE_PER_VOTE};
use crate::session::model::{Phase, RankedCandidate, Session, Song, SongEntry};

/// Records a participant's song suggestion for the current round.
pub fn suggest(
    session: &mut Session,
    user_id: &str,
    song: Song,
    now: u64,
) -> CrowdjamResult<SongEntry> {
    if !session.is_participant(user_id) {
        return Err(CrowdjamError::Forbidden(format!(
            "{} is not a participant of session {}",
            user_id, session.id
        )));
    }
    if session.phase != Some(Phase::Suggestion) {
        return Err(CrowdjamError::InvalidRequest(
            "suggestions are only accepted during the suggestion phase".to_string(),
        ));
    }
    if song.id.trim().is_empty() || song.uri.trim().is_empty() {
        return Err(CrowdjamError::InvalidRequest(
            "a suggestion needs a song id and uri".to_string(),
        ));
    }
    if session.suggestions.contains_key(user_id) {
        return Err(CrowdjamError::AlreadyActed(format!(
            "{} already suggested a song this round",
            user_id
        )));
    }

    let entry = SongEntry::new(song, user_id, now);
    session
        .suggestions
        .insert(user_id.to_string(), entry.clone());
    Ok(entry)
}

/// Current suggestions in the order they were made.
pub fn suggestions_in_order(session: &Session) -> Vec<SongEntry> {
    let mut entries: Vec<SongEntry> = session.suggestions.values().cloned().collect();
    entries.sort_by_key(|e| e.added_at);
    entries
}

/// Builds the ballot from the current suggestions.
///
/// Two participants suggesting the same song produce one option, credited to
/// whoever suggested it first.
pub fn freeze_ballot(session: &Session) -> Vec<SongEntry> {
    let mut seen = HashSet::new();
    suggestions_in_order(session)
        .into_iter()
        .filter(|e| seen.insert(e.id().to_string()))
        .collect()
}

/// Appends the round winner to the queue with a fresh vote count.
pub fn enqueue_winner(session: &mut Session, winner: &SongEntry, now: u64) {
    let mut entry = SongEntry::new(winner.song.clone(), winner.added_by.clone(), now);
    entry.votes = 0;
    session.queue.push(entry);
}

/// Removes and returns the head of the queue.
pub fn dequeue_next(session: &mut Session) -> CrowdjamResult<SongEntry> {
    if session.queue.is_empty() {
        return Err(CrowdjamError::Empty);
    }
    Ok(session.queue.remove(0))
}

/// Orders the queue by votes, highest first. Equal counts keep their order.
pub fn close_round(session: &mut Session) {
    session.queue.sort_by(|a, b| b.votes.cmp(&a.votes));
}

/// Seeded votes for a recommendation of the given confidence.
pub fn confidence_to_votes(confidence: f32) -> u32 {
    if !confidence.is_finite() {
        return 0;
    }
    (confidence.clamp(0.0, 100.0) / AI_CONFIDENCE_PER_VOTE).floor() as u32
}

/// Appends recommendation candidates that are not already in the session.
///
/// Returns the number of entries added.
pub fn merge_recommendations(
    session: &mut Session,
    candidates: &[RankedCandidate],
    now: u64,
) -> usize {
    let mut batch: HashSet<&str> = HashSet::new();
    let mut added = 0;
    for candidate in candidates {
        let id = candidate.song.id.as_str();
        if id.is_empty() || session.holds_song(id) || !batch.insert(id) {
            continue;
        }
        let mut entry = SongEntry::new(candidate.song.clone(), AI_ADDED_BY, now);
        entry.votes = confidence_to_votes(candidate.confidence);
        session.queue.push(entry);
        added += 1;
    }
    added
}

/// Recently played or queued tracks, most recent first, for recommendation
/// context.
pub fn recent_tracks(session: &Session) -> Vec<Song> {
    session
        .current_song
        .iter()
        .chain(session.up_next.iter())
        .chain(session.queue.iter())
        .map(|e| e.song.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::fixtures::{entry, session_with, song};

    fn candidate(id: &str, confidence: f32) -> RankedCandidate {
        RankedCandidate {
            song: song(id),
            confidence,
        }
    }

    #[test]
    fn suggestion_is_once_per_round() {
        let mut session = session_with(&["alice"]);
        session.phase = Some(Phase::Suggestion);
        suggest(&mut session, "alice", song("s1"), 1).unwrap();
        let err = suggest(&mut session, "alice", song("s2"), 2).unwrap_err();
        assert_eq!(err.code(), "already_acted");
        assert_eq!(session.suggestions.len(), 1);
    }

    #[test]
    fn suggestion_outside_suggestion_phase_is_rejected() {
        let mut session = session_with(&["alice"]);
        session.phase = Some(Phase::Voting);
        let err = suggest(&mut session, "alice", song("s1"), 1).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        assert!(session.suggestions.is_empty());
    }

    #[test]
    fn ballot_dedupes_by_song_keeping_first_suggester() {
        let mut session = session_with(&["alice", "bob"]);
        session.phase = Some(Phase::Suggestion);
        suggest(&mut session, "bob", song("s1"), 5).unwrap();
        suggest(&mut session, "alice", song("s1"), 9).unwrap();
        suggest(&mut session, "host", song("s2"), 7).unwrap();

        let ballot = freeze_ballot(&session);
        let ids: Vec<&str> = ballot.iter().map(SongEntry::id).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(ballot[0].added_by, "bob");
    }

    #[test]
    fn dequeue_on_empty_queue_fails() {
        let mut session = session_with(&[]);
        assert_eq!(dequeue_next(&mut session), Err(CrowdjamError::Empty));
    }

    #[test]
    fn close_round_sorts_stably_by_votes() {
        let mut session = session_with(&[]);
        session.queue = vec![entry("a", 1), entry("b", 3), entry("c", 1), entry("d", 3)];
        close_round(&mut session);
        let ids: Vec<&str> = session.queue.iter().map(SongEntry::id).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
        assert_eq!(dequeue_next(&mut session).unwrap().id(), "b");
    }

    #[test]
    fn confidence_maps_to_votes() {
        assert_eq!(confidence_to_votes(100.0), 5);
        assert_eq!(confidence_to_votes(79.9), 3);
        assert_eq!(confidence_to_votes(19.0), 0);
        assert_eq!(confidence_to_votes(250.0), 5);
        assert_eq!(confidence_to_votes(-4.0), 0);
        assert_eq!(confidence_to_votes(f32::NAN), 0);
    }

    #[test]
    fn merge_skips_songs_already_in_the_session() {
        let mut session = session_with(&[]);
        session.queue.push(entry("q1", 2));
        session.current_song = Some(entry("playing", 0));
        session.up_next = Some(entry("next", 0));

        let added = merge_recommendations(
            &mut session,
            &[
                candidate("q1", 90.0),
                candidate("playing", 90.0),
                candidate("next", 90.0),
                candidate("fresh", 60.0),
                candidate("fresh", 95.0),
            ],
            100,
        );
        assert_eq!(added, 1);
        let fresh = session.queue.last().unwrap();
        assert_eq!(fresh.id(), "fresh");
        assert_eq!(fresh.votes, 3);
        assert_eq!(fresh.added_by, AI_ADDED_BY);
        assert!(fresh.voters.is_empty());

        let ids: HashSet<&str> = session.queue.iter().map(SongEntry::id).collect();
        assert_eq!(ids.len(), session.queue.len());
    }

    #[test]
    fn winner_enters_queue_without_votes() {
        let mut session = session_with(&[]);
        let mut winner = entry("w", 4);
        winner.voters.insert("alice".into());
        enqueue_winner(&mut session, &winner, 50);
        assert_eq!(session.queue[0].votes, 0);
        assert!(session.queue[0].voters.is_empty());
        assert_eq!(session.queue[0].added_at, 50);
    }
}
