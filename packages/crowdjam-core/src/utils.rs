//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::protocol_constants::{SESSION_CODE_ALPHABET, SESSION_CODE_LEN};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Generates a random session code such as `K7QD`.
pub fn generate_session_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SESSION_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SESSION_CODE_ALPHABET.len());
            SESSION_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Normalizes a client-supplied session code (trimmed, uppercase).
///
/// Returns `None` when the code is empty or not exactly four alphanumerics.
pub fn normalize_session_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    let valid =
        code.len() == SESSION_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_codes_use_the_session_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = generate_session_code(&mut rng);
            assert_eq!(code.len(), SESSION_CODE_LEN);
            assert!(code.bytes().all(|b| SESSION_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn normalize_accepts_lowercase_and_padding() {
        assert_eq!(normalize_session_code(" abcd "), Some("ABCD".to_string()));
        assert_eq!(normalize_session_code("AB1D"), Some("AB1D".to_string()));
    }

    #[test]
    fn normalize_rejects_wrong_length_or_symbols() {
        assert_eq!(normalize_session_code(""), None);
        assert_eq!(normalize_session_code("ABCDE"), None);
        assert_eq!(normalize_session_code("AB-D"), None);
    }
}
