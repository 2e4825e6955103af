//! Fixed protocol constants that should NOT be changed.
//!
//! These values define the round structure and wire behaviour that clients
//! rely on. Tunable parameters live in [`crate::state::EngineConfig`].

// ─────────────────────────────────────────────────────────────────────────────
// Voting Rounds
// ─────────────────────────────────────────────────────────────────────────────

/// Length of the LOCKED window at the end of every track (ms).
///
/// Voting closes this long before the track ends so the winner can be handed
/// to the music service in time to play next.
pub const LOCK_WINDOW_MS: u64 = 10_000;

/// Maximum number of genres on one ballot.
pub const MAX_GENRES_PER_BALLOT: usize = 3;

/// Confidence points per seeded vote for AI candidates.
///
/// A candidate with confidence 100 enters the queue with 5 votes.
pub const AI_CONFIDENCE_PER_VOTE: f32 = 20.0;

/// `addedBy` marker for entries merged from the recommendation feed.
pub const AI_ADDED_BY: &str = "AI";

// ─────────────────────────────────────────────────────────────────────────────
// Session Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Length of a session code.
pub const SESSION_CODE_LEN: usize = 4;

/// Alphabet for generated session codes (no 0/O or 1/I look-alikes).
pub const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Attempts before giving up on finding an unused session code.
pub const SESSION_CODE_ATTEMPTS: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Gateways
// ─────────────────────────────────────────────────────────────────────────────

/// Retry delays for transient gateway errors (exponential backoff).
pub const GATEWAY_RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

/// Default timeout for gateway HTTP requests (seconds).
pub const GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Number of tracks returned by a search.
pub const SEARCH_RESULT_LIMIT: u32 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "crowdjam";

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the event broadcast channel for WebSocket clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// WebSocket heartbeat timeout (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;
