//! Per-session lifecycle tracking
//!
//! The [`CallTable`] holds every session placed through the bridge together with its
//! [`CallLifecycleState`]. Engine callbacks consult it before acting: a callback for a
//! session that is no longer tracked (hung up concurrently, or already closed) is dropped.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{CallLifecycleState, CallSession, SessionId};

/// Outcome of [`CallTable::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed from the contained state
    Applied(CallLifecycleState),
    /// Already in the requested state
    Unchanged,
    /// Not a legal move from the contained state
    Rejected(CallLifecycleState),
    /// Session is not tracked
    Unknown,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Debug, Default)]
pub struct CallTable {
    calls: Mutex<HashMap<SessionId, CallSession>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new session, replacing any stale record with the same id
    pub fn insert(&self, session: CallSession) {
        if let Some(stale) = self.calls.lock().insert(session.session_id, session) {
            tracing::warn!(
                "Engine reused session id {} while still tracked in state {}",
                stale.session_id,
                stale.state
            );
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<CallSession> {
        self.calls.lock().get(&session_id).cloned()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.calls.lock().contains_key(&session_id)
    }

    pub fn state(&self, session_id: SessionId) -> Option<CallLifecycleState> {
        self.calls.lock().get(&session_id).map(|c| c.state)
    }

    /// Move a session to `next` if the transition is legal.
    pub fn transition(&self, session_id: SessionId, next: CallLifecycleState) -> Transition {
        let mut calls = self.calls.lock();
        let Some(call) = calls.get_mut(&session_id) else {
            return Transition::Unknown;
        };
        let from = call.state;
        if from == next {
            return Transition::Unchanged;
        }
        if !from.can_transition_to(next) {
            return Transition::Rejected(from);
        }
        call.state = next;
        tracing::debug!("Session {} {} -> {}", session_id, from, next);
        Transition::Applied(from)
    }

    /// Move a session to a terminal state and stop tracking it.
    ///
    /// Returns the final record, already in its terminal state. A session that reached a
    /// terminal state earlier keeps it.
    pub fn finish(&self, session_id: SessionId, terminal: CallLifecycleState) -> Option<CallSession> {
        debug_assert!(terminal.is_terminal());
        let mut call = self.calls.lock().remove(&session_id)?;
        if !call.state.is_terminal() {
            tracing::debug!("Session {} {} -> {}", session_id, call.state, terminal);
            call.state = terminal;
        }
        Some(call)
    }

    /// Snapshot of tracked sessions, ordered by id
    pub fn sessions(&self) -> Vec<CallSession> {
        let mut calls: Vec<_> = self.calls.lock().values().cloned().collect();
        calls.sort_by_key(|c| c.session_id);
        calls
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallLifecycleState::*;

    fn table_with(raw: i64) -> (CallTable, SessionId) {
        let table = CallTable::new();
        let id = SessionId::new(raw).unwrap();
        table.insert(CallSession::outgoing(id, "1002", false));
        (table, id)
    }

    #[test]
    fn test_transition_outcomes() {
        let (table, id) = table_with(500);
        assert_eq!(table.state(id), Some(Dialing));

        assert_eq!(table.transition(id, Ringing), Transition::Applied(Dialing));
        assert_eq!(table.transition(id, Ringing), Transition::Unchanged);
        assert_eq!(table.transition(id, Held), Transition::Rejected(Ringing));
        assert_eq!(table.transition(id, Connected), Transition::Applied(Ringing));
        assert!(table.transition(id, Held).is_applied());
        assert_eq!(table.state(id), Some(Held));

        let other = SessionId::new(9).unwrap();
        assert_eq!(table.transition(other, Connected), Transition::Unknown);
    }

    #[test]
    fn test_finish_records_terminal_state() {
        let (table, id) = table_with(41);
        table.transition(id, Connected);
        let record = table.finish(id, Ended).unwrap();
        assert_eq!(record.state, Ended);
        assert!(!table.contains(id));
        assert!(table.finish(id, Failed).is_none());

        let (table, id) = table_with(42);
        assert_eq!(table.finish(id, Failed).map(|c| c.state), Some(Failed));
    }
}
