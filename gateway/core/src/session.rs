//! Session State
//!
//! One session per live connection. A session owns the ordered history of
//! completed exchanges and the single active-request slot that serializes
//! streaming: at most one request streams to a connection at a time, so
//! fragment delivery can never interleave across requests on the same wire.
//!
//! # Design Philosophy
//!
//! Sessions hold no channels and spawn no tasks; they are plain state guarded
//! by the registry's per-entry lock. The dispatcher mutates the active slot on
//! request start and completion, the registry tears the session down when its
//! connection closes.

use chrono::{DateTime, Utc};

use crate::engine::CancelHandle;
use crate::error::DispatchError;
use crate::protocol::{ConnectionId, HistoryTurn, RequestId, Role};

/// A completed exchange recorded in session history
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    /// Who authored the entry
    pub role: Role,
    /// The entry's text
    pub text: String,
    /// When the entry was recorded
    pub at: DateTime<Utc>,
}

/// Bookkeeping for the request currently holding the active slot
#[derive(Debug)]
pub struct ActiveRequest {
    /// The admitted request
    pub request_id: RequestId,
    /// Cancellation handle wired to the request's engine task
    pub cancel: CancelHandle,
    /// When the request was admitted
    pub started_at: DateTime<Utc>,
}

impl ActiveRequest {
    /// Signal cancellation to the request's engine task
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Server-side state for one client connection
#[derive(Debug)]
pub struct Session {
    connection_id: ConnectionId,
    history: Vec<HistoryEntry>,
    active: Option<ActiveRequest>,
    created_at: DateTime<Utc>,
    /// Maximum history entries to keep (0 = unlimited)
    max_history_entries: usize,
}

impl Session {
    /// Create an empty session for a connection
    #[must_use]
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            history: Vec::new(),
            active: None,
            created_at: Utc::now(),
            max_history_entries: 0,
        }
    }

    /// Create an empty session with a history cap
    #[must_use]
    pub fn with_history_cap(connection_id: ConnectionId, max_history_entries: usize) -> Self {
        Self {
            connection_id,
            history: Vec::new(),
            active: None,
            created_at: Utc::now(),
            max_history_entries,
        }
    }

    /// The connection this session belongs to
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// When the session was opened
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // ============================================
    // Active-request slot
    // ============================================

    /// Claim the active slot for a new request
    ///
    /// Fails with [`DispatchError::Busy`] if another request holds the slot;
    /// the new request is not admitted and nothing changes.
    pub fn try_begin_request(
        &mut self,
        request_id: RequestId,
        cancel: CancelHandle,
    ) -> Result<(), DispatchError> {
        if let Some(active) = &self.active {
            return Err(DispatchError::Busy {
                active: active.request_id.clone(),
            });
        }
        self.active = Some(ActiveRequest {
            request_id,
            cancel,
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Release the active slot if `request_id` still holds it
    ///
    /// Returns whether the slot was released. A mismatch means the slot was
    /// already torn down (session close raced the request's terminal path);
    /// callers treat that as already-released.
    pub fn finish_request(&mut self, request_id: &RequestId) -> bool {
        match &self.active {
            Some(active) if active.request_id == *request_id => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Take the active request out of the slot, if any
    ///
    /// Used by session teardown: the caller cancels the returned request.
    pub fn take_active(&mut self) -> Option<ActiveRequest> {
        self.active.take()
    }

    /// Signal cancellation if `request_id` holds the slot
    ///
    /// Returns whether a matching active request was signalled. The slot is
    /// not released here; the request's relay task releases it once it has
    /// stopped forwarding.
    pub fn cancel_active(&self, request_id: &RequestId) -> bool {
        match &self.active {
            Some(active) if active.request_id == *request_id => {
                active.cancel();
                true
            }
            _ => false,
        }
    }

    /// The request currently holding the slot, if any
    #[must_use]
    pub fn active_request_id(&self) -> Option<&RequestId> {
        self.active.as_ref().map(|a| &a.request_id)
    }

    /// Whether a request currently holds the slot
    #[must_use]
    pub fn has_active_request(&self) -> bool {
        self.active.is_some()
    }

    // ============================================
    // History
    // ============================================

    /// Record a completed exchange
    pub fn append_history(&mut self, role: Role, text: impl Into<String>) {
        self.history.push(HistoryEntry {
            role,
            text: text.into(),
            at: Utc::now(),
        });
        if self.max_history_entries > 0 && self.history.len() > self.max_history_entries {
            let excess = self.history.len() - self.max_history_entries;
            self.history.drain(..excess);
        }
    }

    /// The recorded history, oldest first
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Wire-shaped snapshot of the history for engine context
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<HistoryTurn> {
        self.history
            .iter()
            .map(|entry| HistoryTurn {
                role: entry.role,
                text: entry.text.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::engine::CancelSignal;

    fn session() -> Session {
        Session::new(ConnectionId::new())
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = session();
        assert!(!session.has_active_request());
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_begin_request_claims_slot() {
        let mut session = session();
        let (handle, _signal) = CancelSignal::new();
        let id = RequestId::new();

        session.try_begin_request(id.clone(), handle).unwrap();
        assert_eq!(session.active_request_id(), Some(&id));
    }

    #[test]
    fn test_second_request_is_busy() {
        let mut session = session();
        let (h1, _s1) = CancelSignal::new();
        let (h2, _s2) = CancelSignal::new();
        let first = RequestId::new();

        session.try_begin_request(first.clone(), h1).unwrap();
        let err = session
            .try_begin_request(RequestId::new(), h2)
            .unwrap_err();

        match err {
            DispatchError::Busy { active } => assert_eq!(active, first),
            other => panic!("expected Busy, got {other:?}"),
        }
        // The first request still holds the slot.
        assert_eq!(session.active_request_id(), Some(&first));
    }

    #[test]
    fn test_finish_request_releases_slot() {
        let mut session = session();
        let (handle, _signal) = CancelSignal::new();
        let id = RequestId::new();

        session.try_begin_request(id.clone(), handle).unwrap();
        assert!(session.finish_request(&id));
        assert!(!session.has_active_request());
    }

    #[test]
    fn test_finish_request_ignores_stale_id() {
        let mut session = session();
        let (handle, _signal) = CancelSignal::new();
        let id = RequestId::new();

        session.try_begin_request(id, handle).unwrap();
        // A different request finishing must not clear the slot.
        assert!(!session.finish_request(&RequestId::new()));
        assert!(session.has_active_request());
    }

    #[test]
    fn test_cancel_active_matches_id() {
        let mut session = session();
        let (handle, signal) = CancelSignal::new();
        let id = RequestId::new();
        session.try_begin_request(id.clone(), handle).unwrap();

        // Wrong ID signals nothing.
        assert!(!session.cancel_active(&RequestId::new()));
        assert!(!signal.is_cancelled());

        assert!(session.cancel_active(&id));
        assert!(signal.is_cancelled());
        // The slot stays claimed until the relay releases it.
        assert!(session.has_active_request());
    }

    #[test]
    fn test_take_active_cancels_via_handle() {
        let mut session = session();
        let (handle, signal) = CancelSignal::new();
        session
            .try_begin_request(RequestId::new(), handle)
            .unwrap();

        let active = session.take_active().unwrap();
        active.cancel();
        assert!(signal.is_cancelled());
        assert!(!session.has_active_request());
    }

    #[test]
    fn test_history_append_and_snapshot() {
        let mut session = session();
        session.append_history(Role::User, "hi");
        session.append_history(Role::Assistant, "Hi");

        let snapshot = session.history_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[0].text, "hi");
        assert_eq!(snapshot[1].role, Role::Assistant);
        assert_eq!(snapshot[1].text, "Hi");
    }

    #[test]
    fn test_history_cap_drops_oldest() {
        let mut session = Session::with_history_cap(ConnectionId::new(), 2);
        session.append_history(Role::User, "one");
        session.append_history(Role::Assistant, "two");
        session.append_history(Role::User, "three");

        let texts: Vec<&str> = session.history().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }
}
