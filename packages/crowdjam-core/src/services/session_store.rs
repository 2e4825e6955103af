//! Persistence seam for sessions.
//!
//! The registry writes every accepted mutation through a [`SessionStore`] and
//! falls back to it on lookups, so a session outlives the in-memory handle.
//! [`InMemorySessionStore`] is the default; a durable store only needs to
//! implement the three methods.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CrowdjamResult;
use crate::session::Session;

/// Storage backend for session snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session snapshot, `None` if unknown.
    async fn load(&self, session_id: &str) -> CrowdjamResult<Option<Session>>;

    /// Saves (inserts or replaces) a session snapshot.
    async fn save(&self, session: &Session) -> CrowdjamResult<()>;

    /// Deletes a session snapshot. Deleting an unknown id is not an error.
    async fn delete(&self, session_id: &str) -> CrowdjamResult<()>;
}

/// Session snapshots kept in process memory.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> CrowdjamResult<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn save(&self, session: &Session) -> CrowdjamResult<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> CrowdjamResult<()> {
        self.sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_delete() {
        let store = InMemorySessionStore::new();
        let session = Session::new("ABCD", "host", "Host", 0);

        store.save(&session).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("ABCD").await.unwrap(), Some(session));

        store.delete("ABCD").await.unwrap();
        store.delete("ABCD").await.unwrap();
        assert!(store.load("ABCD").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
