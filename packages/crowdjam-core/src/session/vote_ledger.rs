//! Genre ballots and song votes.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::error::{CrowdjamError, CrowdjamResult};
use crate::protocol_constants::MAX_GENRES_PER_BALLOT;
use crate::session::model::{GenreTally, Phase, Session, SongEntry};

/// Result of accepting a genre ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenreBallotOutcome {
    pub total_votes: usize,
    pub quota: usize,
    pub quota_reached: bool,
}

/// Votes held by one ballot option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCount {
    pub song_id: String,
    pub votes: usize,
}

/// Total genre votes needed to close the genre vote early.
pub fn genre_quota(session: &Session, votes_per_participant: usize) -> usize {
    session.participant_count() * votes_per_participant
}

pub fn total_genre_votes(session: &Session) -> usize {
    session.genre_tally.iter().map(|t| t.votes as usize).sum()
}

/// Records a participant's genre ballot.
///
/// A ballot holds 1 to 3 distinct genres and each participant gets one ballot
/// per genre vote. Nothing is recorded when the ballot is rejected.
pub fn add_genre_votes(
    session: &mut Session,
    user_id: &str,
    genres: &[String],
    votes_per_participant: usize,
) -> CrowdjamResult<GenreBallotOutcome> {
    if !session.is_participant(user_id) {
        return Err(CrowdjamError::Forbidden(format!(
            "{} is not a participant of session {}",
            user_id, session.id
        )));
    }

    let mut ballot: Vec<String> = Vec::with_capacity(genres.len());
    for genre in genres {
        let genre = genre.trim();
        if genre.is_empty() {
            return Err(CrowdjamError::InvalidRequest(
                "genre names must not be empty".to_string(),
            ));
        }
        if ballot.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
            return Err(CrowdjamError::InvalidRequest(format!(
                "genre {} appears twice on the ballot",
                genre
            )));
        }
        ballot.push(genre.to_string());
    }
    if ballot.is_empty() || ballot.len() > MAX_GENRES_PER_BALLOT {
        return Err(CrowdjamError::InvalidRequest(format!(
            "a ballot holds between 1 and {} genres",
            MAX_GENRES_PER_BALLOT
        )));
    }
    if session.genre_voters.contains(user_id) {
        return Err(CrowdjamError::AlreadyActed(format!(
            "{} already voted on genres",
            user_id
        )));
    }

    for genre in ballot {
        match session
            .genre_tally
            .iter_mut()
            .find(|t| t.genre.eq_ignore_ascii_case(&genre))
        {
            Some(tally) => tally.votes += 1,
            None => session.genre_tally.push(GenreTally { genre, votes: 1 }),
        }
    }
    session.genre_voters.insert(user_id.to_string());

    let total_votes = total_genre_votes(session);
    let quota = genre_quota(session, votes_per_participant);
    Ok(GenreBallotOutcome {
        total_votes,
        quota,
        quota_reached: total_votes >= quota,
    })
}

/// The `n` most voted genres, ties kept in nomination order.
pub fn top_genres(session: &Session, n: usize) -> Vec<String> {
    let mut tallies: Vec<&GenreTally> = session.genre_tally.iter().collect();
    tallies.sort_by(|a, b| b.votes.cmp(&a.votes));
    tallies.into_iter().take(n).map(|t| t.genre.clone()).collect()
}

/// Casts a song vote, replacing the participant's earlier vote in this round.
pub fn add_song_vote(session: &mut Session, user_id: &str, song_id: &str) -> CrowdjamResult<()> {
    if !session.is_participant(user_id) {
        return Err(CrowdjamError::Forbidden(format!(
            "{} is not a participant of session {}",
            user_id, session.id
        )));
    }
    if session.phase != Some(Phase::Voting) {
        return Err(CrowdjamError::InvalidRequest(
            "song votes are only accepted during the voting phase".to_string(),
        ));
    }
    if session.votable_option(song_id).is_none() {
        return Err(CrowdjamError::NotFound(format!(
            "song {} is not on the ballot",
            song_id
        )));
    }

    withdraw_vote(session, user_id);
    session
        .votes
        .entry(song_id.to_string())
        .or_default()
        .insert(user_id.to_string());
    Ok(())
}

/// Removes the participant's current song vote, if any.
fn withdraw_vote(session: &mut Session, user_id: &str) {
    session.votes.retain(|_, voters| {
        voters.remove(user_id);
        !voters.is_empty()
    });
}

/// Vote counts for every ballot option, in ballot order.
pub fn tally(session: &Session) -> Vec<VoteCount> {
    session
        .votable_options
        .iter()
        .map(|option| VoteCount {
            song_id: option.id().to_string(),
            votes: session.votes.get(option.id()).map_or(0, BTreeSet::len),
        })
        .collect()
}

/// Participants holding a song vote in this round.
pub fn distinct_voters(session: &Session) -> usize {
    session
        .votes
        .values()
        .flatten()
        .collect::<BTreeSet<_>>()
        .len()
}

/// Picks the round winner: the most voted option, with ties broken uniformly
/// at random. `None` when no option received a vote.
pub fn resolve_tie<R: Rng + ?Sized>(session: &Session, rng: &mut R) -> Option<SongEntry> {
    let counts = tally(session);
    let max = counts.iter().map(|c| c.votes).max().unwrap_or(0);
    if max == 0 {
        return None;
    }
    let leaders: Vec<&VoteCount> = counts.iter().filter(|c| c.votes == max).collect();
    let pick = leaders.choose(rng)?;
    session.votable_option(&pick.song_id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::fixtures::{entry, session_with};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn genres(list: &[&str]) -> Vec<String> {
        list.iter().map(|g| g.to_string()).collect()
    }

    fn voting_session(options: &[&str]) -> Session {
        let mut session = session_with(&["a", "b", "c"]);
        session.phase = Some(Phase::Voting);
        session.votable_options = options.iter().map(|id| entry(id, 0)).collect();
        session
    }

    #[test]
    fn genre_ballot_is_one_shot() {
        let mut session = session_with(&["alice"]);
        let outcome = add_genre_votes(&mut session, "alice", &genres(&["rock", "jazz"]), 3)
            .expect("first ballot");
        assert_eq!(outcome.total_votes, 2);
        assert_eq!(outcome.quota, 6);
        assert!(!outcome.quota_reached);

        let err = add_genre_votes(&mut session, "alice", &genres(&["pop"]), 3).unwrap_err();
        assert_eq!(err.code(), "already_acted");
        assert_eq!(total_genre_votes(&session), 2);
    }

    #[test]
    fn genre_ballot_rejects_bad_shapes_without_recording() {
        let mut session = session_with(&["alice"]);
        for ballot in [
            genres(&[]),
            genres(&["a", "b", "c", "d"]),
            genres(&["rock", "Rock"]),
            genres(&["  "]),
        ] {
            let err = add_genre_votes(&mut session, "alice", &ballot, 3).unwrap_err();
            assert_eq!(err.code(), "invalid_request");
        }
        assert!(session.genre_tally.is_empty());
        assert!(session.genre_voters.is_empty());

        let err = add_genre_votes(&mut session, "mallory", &genres(&["rock"]), 3).unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn genre_quota_counts_every_participant() {
        let mut session = session_with(&["alice"]);
        add_genre_votes(&mut session, "host", &genres(&["rock", "jazz", "pop"]), 3).unwrap();
        let outcome =
            add_genre_votes(&mut session, "alice", &genres(&["rock", "funk", "soul"]), 3).unwrap();
        assert!(outcome.quota_reached);
        assert_eq!(top_genres(&session, 1), vec!["rock".to_string()]);
        assert_eq!(session.genre_tally[0].votes, 2);
    }

    #[test]
    fn participant_holds_a_single_song_vote() {
        let mut session = voting_session(&["s1", "s2"]);
        add_song_vote(&mut session, "a", "s1").unwrap();
        add_song_vote(&mut session, "a", "s2").unwrap();
        add_song_vote(&mut session, "a", "s2").unwrap();

        let counts = tally(&session);
        assert_eq!(counts[0].votes, 0);
        assert_eq!(counts[1].votes, 1);
        assert_eq!(distinct_voters(&session), 1);
    }

    #[test]
    fn unknown_song_vote_leaves_votes_unchanged() {
        let mut session = voting_session(&["s1"]);
        add_song_vote(&mut session, "a", "s1").unwrap();
        let err = add_song_vote(&mut session, "a", "nope").unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert_eq!(tally(&session)[0].votes, 1);
    }

    #[test]
    fn song_vote_outside_voting_is_rejected() {
        let mut session = voting_session(&["s1"]);
        session.phase = Some(Phase::Suggestion);
        assert_eq!(
            add_song_vote(&mut session, "a", "s1").unwrap_err().code(),
            "invalid_request"
        );
        session.phase = Some(Phase::Locked);
        assert!(add_song_vote(&mut session, "a", "s1").is_err());
        assert!(session.votes.is_empty());
    }

    #[test]
    fn resolve_tie_without_votes_has_no_winner() {
        let session = voting_session(&["s1", "s2"]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(resolve_tie(&session, &mut rng).is_none());
    }

    #[test]
    fn resolve_tie_prefers_the_clear_leader() {
        let mut session = voting_session(&["s1", "s2"]);
        add_song_vote(&mut session, "a", "s2").unwrap();
        add_song_vote(&mut session, "b", "s2").unwrap();
        add_song_vote(&mut session, "c", "s1").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(resolve_tie(&session, &mut rng).unwrap().id(), "s2");
    }

    #[test]
    fn three_way_tie_is_roughly_uniform() {
        let mut session = voting_session(&["s1", "s2", "s3"]);
        add_song_vote(&mut session, "a", "s1").unwrap();
        add_song_vote(&mut session, "b", "s2").unwrap();
        add_song_vote(&mut session, "c", "s3").unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let mut wins: HashMap<String, u32> = HashMap::new();
        for _ in 0..3_000 {
            let winner = resolve_tie(&session, &mut rng).unwrap();
            *wins.entry(winner.id().to_string()).or_default() += 1;
        }
        assert_eq!(wins.len(), 3);
        for count in wins.values() {
            assert!((850..=1150).contains(count), "skewed tie-break: {:?}", wins);
        }
    }
}
