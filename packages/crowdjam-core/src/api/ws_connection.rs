//! WebSocket connection tracking and management.
//!
//! - `WsConnectionManager`: Tracks all active WebSocket connections and the
//!   session participant each one acts as
//! - `ConnectionGuard`: RAII guard for automatic cleanup on disconnect

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// The participant a connection acts as once it has created or joined a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub session_id: String,
    pub user_id: String,
}

struct ConnectionState {
    binding: Option<Binding>,
}

/// Manages all active WebSocket connections.
///
/// Each connection holds a child of the global cancellation token, so
/// cancelling the global token force-closes all of them at once.
pub struct WsConnectionManager {
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Replaced after `close_all()` so new connections can still be accepted.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new connection and returns a guard for RAII cleanup.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.connections
            .insert(conn_id.clone(), ConnectionState { binding: None });
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            conn_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if self.connections.remove(id).is_some() {
            log::info!(
                "[WS] Connection unregistered: {} (remaining: {})",
                id,
                self.connections.len()
            );
        }
    }

    /// Binds a connection to a session participant, replacing any prior binding.
    ///
    /// Returns the previous binding when it differed.
    pub fn bind(&self, id: &str, session_id: &str, user_id: &str) -> Option<Binding> {
        let mut conn = self.connections.get_mut(id)?;
        let binding = Binding {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        };
        if conn.binding.as_ref() == Some(&binding) {
            return None;
        }
        log::info!("[WS] {} bound to {} in {}", id, user_id, session_id);
        conn.binding.replace(binding)
    }

    pub fn binding(&self, id: &str) -> Option<Binding> {
        self.connections.get(id).and_then(|c| c.binding.clone())
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Force-closes all connections.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a connection when dropped.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled on force-close; select on it in the connection loop.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn bind(&self, session_id: &str, user_id: &str) -> Option<Binding> {
        self.manager.bind(&self.id, session_id, user_id)
    }

    pub fn binding(&self) -> Option<Binding> {
        self.manager.binding(&self.id)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_unregisters_on_drop() {
        let manager = Arc::new(WsConnectionManager::new());
        let guard = manager.register();
        assert_eq!(manager.connection_count(), 1);
        drop(guard);
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn rebinding_reports_previous_binding() {
        let manager = Arc::new(WsConnectionManager::new());
        let guard = manager.register();
        assert_eq!(guard.bind("ABCD", "alice"), None);
        assert_eq!(guard.bind("ABCD", "alice"), None);
        let previous = guard.bind("WXYZ", "alice").unwrap();
        assert_eq!(previous.session_id, "ABCD");
        assert_eq!(guard.binding().unwrap().session_id, "WXYZ");
    }

    #[test]
    fn close_all_leaves_manager_usable() {
        let manager = Arc::new(WsConnectionManager::new());
        let old = manager.register();
        assert_eq!(manager.close_all(), 1);
        assert!(old.cancel_token().is_cancelled());

        let fresh = manager.register();
        assert!(!fresh.cancel_token().is_cancelled());
    }
}
