//! Per-host music service access tokens.

use dashmap::DashMap;

/// Access tokens registered by hosts, keyed by host id.
///
/// Tokens are supplied by the host's client after it completes the music
/// service's OAuth flow; the server never sees the refresh token.
#[derive(Default)]
pub struct HostTokenStore {
    tokens: DashMap<String, String>,
}

impl HostTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a host's token.
    pub fn set(&self, host_id: &str, token: &str) {
        self.tokens.insert(host_id.to_string(), token.to_string());
        log::info!("[Gateway] Access token registered for host {}", host_id);
    }

    pub fn get(&self, host_id: &str) -> Option<String> {
        self.tokens.get(host_id).map(|t| t.value().clone())
    }

    pub fn remove(&self, host_id: &str) -> bool {
        self.tokens.remove(host_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_replaced_per_host() {
        let store = HostTokenStore::new();
        store.set("host", "a");
        store.set("host", "b");
        assert_eq!(store.get("host").as_deref(), Some("b"));
        assert!(store.remove("host"));
        assert!(store.get("host").is_none());
    }
}
