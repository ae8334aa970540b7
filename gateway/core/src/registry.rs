//! Session Registry
//!
//! The one globally shared mutable structure in the gateway: an arena of
//! sessions keyed by connection ID. Entries are guarded individually (a
//! sharded map plus one mutex per session), so different connections never
//! contend and there is no global lock across all sessions.
//!
//! # Design Philosophy
//!
//! The registry is cheap to clone and every clone shares the same state, so
//! the gateway loop, the dispatcher and connection handler tasks can each hold
//! one. Session locks are synchronous and never held across an await; all
//! await points happen outside the lock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::protocol::{ConnectionId, RequestId, Role};
use crate::session::Session;

/// Shared handle to one session, locked per-entry
pub type SessionHandle = Arc<Mutex<Session>>;

/// Arena of live sessions, one per open connection
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<ConnectionId, SessionHandle>>,
    /// History cap applied to newly opened sessions (0 = unlimited)
    max_history_entries: usize,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose sessions cap history length
    #[must_use]
    pub fn with_history_cap(max_history_entries: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            max_history_entries,
        }
    }

    /// Open the session for a connection
    ///
    /// Idempotent: opening an already-open connection returns the existing
    /// session unchanged. Never fails.
    pub fn open(&self, connection_id: ConnectionId) -> SessionHandle {
        let entry = self.sessions.entry(connection_id.clone()).or_insert_with(|| {
            tracing::debug!(connection_id = %connection_id, "Session opened");
            Arc::new(Mutex::new(Session::with_history_cap(
                connection_id.clone(),
                self.max_history_entries,
            )))
        });
        Arc::clone(entry.value())
    }

    /// Look up the session for a connection
    #[must_use]
    pub fn get(&self, connection_id: &ConnectionId) -> Option<SessionHandle> {
        self.sessions
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Close a connection's session
    ///
    /// Cancels the active request, if any, then removes the entry. Safe to
    /// call concurrently with an in-flight dispatch for the same session: the
    /// entry is removed first, and a dispatcher still holding the handle sees
    /// the cancellation at its next yield point. Returns whether a session
    /// existed.
    pub fn close(&self, connection_id: &ConnectionId) -> bool {
        let Some((_, session)) = self.sessions.remove(connection_id) else {
            return false;
        };

        let active = session.lock().take_active();
        if let Some(active) = active {
            tracing::debug!(
                connection_id = %connection_id,
                request_id = %active.request_id,
                "Cancelling active request on session close"
            );
            active.cancel();
        }

        tracing::debug!(connection_id = %connection_id, "Session closed");
        true
    }

    /// Record a completed exchange on a connection's session
    ///
    /// Returns false when no session is open for the connection.
    pub fn append_history(
        &self,
        connection_id: &ConnectionId,
        role: Role,
        text: impl Into<String>,
    ) -> bool {
        match self.get(connection_id) {
            Some(session) => {
                session.lock().append_history(role, text);
                true
            }
            None => false,
        }
    }

    /// The request currently streaming on a connection, if any
    #[must_use]
    pub fn active_request_id(&self, connection_id: &ConnectionId) -> Option<RequestId> {
        self.get(connection_id)
            .and_then(|session| session.lock().active_request_id().cloned())
    }

    /// Number of open sessions
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// IDs of all open connections
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}
