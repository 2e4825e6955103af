//! Session registry: owns every live session.
//!
//! Sessions are indexed by id in a `DashMap`. Each entry holds the session
//! behind its own async mutex, so commands and ticks for one session are
//! serialized while different sessions proceed in parallel. Accepted
//! mutations are written through to the [`SessionStore`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{CrowdjamError, CrowdjamResult};
use crate::protocol_constants::SESSION_CODE_ATTEMPTS;
use crate::runtime::TokioSpawner;
use crate::services::scheduler::SessionScheduler;
use crate::services::session_store::SessionStore;
use crate::session::Session;
use crate::utils::{generate_session_code, normalize_session_code};

/// A live session with its timers.
pub struct SessionHandle {
    session: Mutex<Session>,
    scheduler: SessionScheduler,
    ticking: AtomicBool,
    /// Set under the session lock once the session is torn down.
    removed: AtomicBool,
}

impl SessionHandle {
    pub fn scheduler(&self) -> &SessionScheduler {
        &self.scheduler
    }

    /// Returns `true` exactly once per handle, to whoever starts its ticker.
    pub fn claim_ticker(&self) -> bool {
        self.ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Result of a participant leaving.
#[derive(Debug, Clone)]
pub struct Departure {
    pub was_host: bool,
    /// Participants still connected.
    pub remaining: usize,
    pub session: Session,
}

/// Owns every live session.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
    store: Arc<dyn SessionStore>,
    shutdown: CancellationToken,
    spawner: TokioSpawner,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        shutdown: CancellationToken,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            shutdown,
            spawner,
        }
    }

    fn new_handle(&self, session: Session) -> Arc<SessionHandle> {
        let scheduler = SessionScheduler::new(&session.id, &self.shutdown, self.spawner.clone());
        Arc::new(SessionHandle {
            session: Mutex::new(session),
            scheduler,
            ticking: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        })
    }

    /// Creates a session hosted by `host_id`.
    ///
    /// Uses `requested_id` when given, otherwise generates an unused code.
    pub async fn create(
        &self,
        requested_id: Option<&str>,
        host_id: &str,
        host_name: &str,
        now: u64,
    ) -> CrowdjamResult<Session> {
        if host_id.trim().is_empty() {
            return Err(CrowdjamError::InvalidRequest(
                "host id must not be empty".to_string(),
            ));
        }
        let id = match requested_id {
            Some(raw) => normalize_session_code(raw).ok_or_else(|| {
                CrowdjamError::InvalidRequest(format!("invalid session code {:?}", raw))
            })?,
            None => self.unused_code().await?,
        };
        if self.store.load(&id).await?.is_some() {
            return Err(CrowdjamError::AlreadyExists(format!("session {}", id)));
        }

        let session = Session::new(id.clone(), host_id, host_name, now);
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(CrowdjamError::AlreadyExists(format!("session {}", id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(self.new_handle(session.clone()));
            }
        }
        self.store.save(&session).await?;
        log::info!("[Registry] Session {} created by {}", id, host_id);
        Ok(session)
    }

    async fn unused_code(&self) -> CrowdjamResult<String> {
        for _ in 0..SESSION_CODE_ATTEMPTS {
            let code = generate_session_code(&mut rand::thread_rng());
            if !self.sessions.contains_key(&code) && self.store.load(&code).await?.is_none() {
                return Ok(code);
            }
        }
        Err(CrowdjamError::Internal(
            "could not find an unused session code".to_string(),
        ))
    }

    /// Returns the live handle, rehydrating it from the store if needed.
    pub async fn handle(&self, session_id: &str) -> CrowdjamResult<Arc<SessionHandle>> {
        let id = normalize_session_code(session_id)
            .ok_or_else(|| CrowdjamError::session_not_found(session_id))?;
        if let Some(handle) = self.sessions.get(&id) {
            return Ok(handle.value().clone());
        }
        let session = self
            .store
            .load(&id)
            .await?
            .ok_or_else(|| CrowdjamError::session_not_found(&id))?;
        log::info!("[Registry] Session {} restored from store", id);
        let handle = self
            .sessions
            .entry(id)
            .or_insert_with(|| self.new_handle(session))
            .value()
            .clone();
        Ok(handle)
    }

    /// Locks the session, failing if it was torn down while we waited.
    async fn lock_live<'a>(
        handle: &'a SessionHandle,
        session_id: &str,
    ) -> CrowdjamResult<MutexGuard<'a, Session>> {
        let session = handle.session.lock().await;
        if handle.removed.load(Ordering::Acquire) {
            return Err(CrowdjamError::session_not_found(session_id));
        }
        Ok(session)
    }

    /// Runs `f` on a copy of the session under its lock, then persists and
    /// commits the copy.
    ///
    /// When `f` or the store fails, the live session is left untouched.
    pub async fn with_session<T, F>(&self, session_id: &str, f: F) -> CrowdjamResult<T>
    where
        F: FnOnce(&mut Session) -> CrowdjamResult<T>,
    {
        let handle = self.handle(session_id).await?;
        let mut session = Self::lock_live(&handle, session_id).await?;
        let mut draft = session.clone();
        let value = f(&mut draft)?;
        self.store.save(&draft).await?;
        *session = draft;
        Ok(value)
    }

    /// Runs `f` on the session under its lock without persisting.
    pub async fn read<T, F>(&self, session_id: &str, f: F) -> CrowdjamResult<T>
    where
        F: FnOnce(&Session) -> T,
    {
        let handle = self.handle(session_id).await?;
        let session = Self::lock_live(&handle, session_id).await?;
        Ok(f(&session))
    }

    /// Snapshot of the session.
    pub async fn get(&self, session_id: &str) -> CrowdjamResult<Session> {
        self.read(session_id, Session::clone).await
    }

    /// Adds a participant. Joining again only marks them connected.
    pub async fn join(
        &self,
        session_id: &str,
        user_id: &str,
        user_name: &str,
    ) -> CrowdjamResult<Session> {
        if user_id.trim().is_empty() {
            return Err(CrowdjamError::InvalidRequest(
                "user id must not be empty".to_string(),
            ));
        }
        self.with_session(session_id, |session| {
            if session.add_participant(user_id, user_name) {
                log::info!("[Registry] {} joined session {}", user_id, session.id);
            }
            Ok(session.clone())
        })
        .await
    }

    /// Removes a participant (the host is only marked disconnected).
    pub async fn leave(&self, session_id: &str, user_id: &str) -> CrowdjamResult<Departure> {
        self.with_session(session_id, |session| {
            if !session.remove_participant(user_id) {
                return Err(CrowdjamError::NotFound(format!(
                    "participant {} in session {}",
                    user_id, session.id
                )));
            }
            log::info!("[Registry] {} left session {}", user_id, session.id);
            Ok(Departure {
                was_host: session.is_host(user_id),
                remaining: session.connected_count(),
                session: session.clone(),
            })
        })
        .await
    }

    /// Ends a session on the host's request.
    pub async fn end(&self, session_id: &str, requester: &str) -> CrowdjamResult<Session> {
        let is_host = self
            .read(session_id, |session| session.is_host(requester))
            .await?;
        if !is_host {
            return Err(CrowdjamError::Forbidden(
                "only the host can end the session".to_string(),
            ));
        }
        self.remove(session_id).await
    }

    /// Tears a session down: cancels its timers and deletes it.
    ///
    /// The handle is marked removed and dropped from the map and store
    /// while its lock is held, so commands queued behind the teardown see
    /// `NotFound` instead of writing the session back.
    pub async fn remove(&self, session_id: &str) -> CrowdjamResult<Session> {
        let handle = self.handle(session_id).await?;
        let session = Self::lock_live(&handle, session_id).await?;
        handle.removed.store(true, Ordering::Release);
        handle.scheduler.cancel();
        self.sessions
            .remove_if(&session.id, |_, live| Arc::ptr_eq(live, &handle));
        self.store.delete(&session.id).await?;
        log::info!("[Registry] Session {} removed", session.id);
        Ok(session.clone())
    }

    /// Ids of the live sessions.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_store::InMemorySessionStore;

    fn registry() -> (SessionRegistry, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let registry = SessionRegistry::new(
            store.clone(),
            CancellationToken::new(),
            TokioSpawner::current(),
        );
        (registry, store)
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let (registry, _) = registry();
        registry.create(Some("abcd"), "host", "Host", 0).await.unwrap();
        let err = registry
            .create(Some("ABCD"), "other", "Other", 0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "already_exists");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn generated_codes_are_unique() {
        let (registry, _) = registry();
        let a = registry.create(None, "h1", "H1", 0).await.unwrap();
        let b = registry.create(None, "h2", "H2", 0).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 4);
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let (registry, _) = registry();
        registry.create(Some("ABCD"), "host", "Host", 0).await.unwrap();
        registry.join("ABCD", "alice", "Alice").await.unwrap();
        let session = registry.join("abcd", "alice", "Alice").await.unwrap();
        assert_eq!(session.participant_count(), 2);
        assert!(registry.join("ZZZZ", "alice", "Alice").await.is_err());
    }

    #[tokio::test]
    async fn only_host_ends_session() {
        let (registry, store) = registry();
        registry.create(Some("ABCD"), "host", "Host", 0).await.unwrap();
        registry.join("ABCD", "alice", "Alice").await.unwrap();

        let err = registry.end("ABCD", "alice").await.unwrap_err();
        assert_eq!(err.code(), "forbidden");
        assert!(registry.get("ABCD").await.is_ok());

        let handle = registry.handle("ABCD").await.unwrap();
        registry.end("ABCD", "host").await.unwrap();
        assert!(handle.scheduler().is_cancelled());
        assert!(store.is_empty());
        assert_eq!(
            registry.get("ABCD").await.unwrap_err().code(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn failed_mutation_is_discarded() {
        let (registry, store) = registry();
        registry.create(Some("ABCD"), "host", "Host", 0).await.unwrap();
        let result: CrowdjamResult<()> = registry
            .with_session("ABCD", |session| {
                session.round = 99;
                Err(CrowdjamError::InvalidRequest("nope".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.load("ABCD").await.unwrap().unwrap().round, 0);
        assert_eq!(registry.get("ABCD").await.unwrap().round, 0);
    }

    #[tokio::test]
    async fn command_queued_behind_removal_does_not_resurrect() {
        let (registry, store) = registry();
        let registry = Arc::new(registry);
        registry.create(Some("ABCD"), "host", "Host", 0).await.unwrap();

        let handle = registry.handle("ABCD").await.unwrap();
        let held = handle.session.lock().await;

        let removing = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.remove("ABCD").await.map(|s| s.id) }
        });
        tokio::task::yield_now().await;
        let command = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move {
                registry
                    .with_session("ABCD", |s| {
                        s.round += 1;
                        Ok(())
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;
        drop(held);

        assert_eq!(removing.await.unwrap().unwrap(), "ABCD");
        let err = command.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(store.is_empty());
        assert!(registry.is_empty());
        assert_eq!(registry.get("ABCD").await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn sessions_are_restored_from_the_store() {
        let (registry, store) = registry();
        store
            .save(&Session::new("WXYZ", "host", "Host", 0))
            .await
            .unwrap();
        let session = registry.get("WXYZ").await.unwrap();
        assert_eq!(session.host_id, "host");
        assert_eq!(registry.len(), 1);

        let handle = registry.handle("WXYZ").await.unwrap();
        assert!(handle.claim_ticker());
        assert!(!handle.claim_ticker());
    }

    #[tokio::test]
    async fn leave_reports_remaining_connections() {
        let (registry, _) = registry();
        registry.create(Some("ABCD"), "host", "Host", 0).await.unwrap();
        registry.join("ABCD", "alice", "Alice").await.unwrap();

        let departure = registry.leave("ABCD", "host").await.unwrap();
        assert!(departure.was_host);
        assert_eq!(departure.remaining, 1);

        let departure = registry.leave("ABCD", "alice").await.unwrap();
        assert!(!departure.was_host);
        assert_eq!(departure.remaining, 0);
    }
}
