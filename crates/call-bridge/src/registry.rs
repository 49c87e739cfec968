//! Session registry
//!
//! Maps engine session ids to native call UI tokens. All operations run under one
//! [`parking_lot::Mutex`], so OS delegate callbacks and engine worker callbacks always
//! observe a consistent mapping. The registry never calls out to the engine or the OS;
//! callers receive copies and do their I/O after the lock is released.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{BridgeError, BridgeResult};
use crate::types::{PlatformToken, SessionId};

/// Thread-safe `SessionId` <-> `PlatformToken` mapping
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, PlatformToken>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` for `session_id`.
    ///
    /// Rejects a second token for the same session, and a token already bound to another
    /// session. Both indicate a broken caller, so nothing is overwritten.
    pub fn put(&self, session_id: SessionId, token: PlatformToken) -> BridgeResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&session_id) {
            tracing::error!("Session {} already registered with native call UI", session_id);
            return Err(BridgeError::DuplicateRegistration { session_id });
        }
        if let Some((other, _)) = entries.iter().find(|(_, t)| **t == token) {
            tracing::error!("Token {} already bound to session {}", token, other);
            return Err(BridgeError::DuplicateRegistration { session_id });
        }
        entries.insert(session_id, token);
        Ok(())
    }

    /// Remove the entry for `session_id`, returning its token if there was one
    pub fn remove(&self, session_id: SessionId) -> Option<PlatformToken> {
        self.entries.lock().remove(&session_id)
    }

    pub fn token_for(&self, session_id: SessionId) -> Option<PlatformToken> {
        self.entries.lock().get(&session_id).copied()
    }

    /// Reverse lookup. Linear, the number of call lines is small.
    pub fn session_for(&self, token: &PlatformToken) -> Option<SessionId> {
        self.entries
            .lock()
            .iter()
            .find(|(_, t)| *t == token)
            .map(|(session_id, _)| *session_id)
    }

    /// Snapshot of all entries, ordered by session id
    pub fn all_entries(&self) -> Vec<(SessionId, PlatformToken)> {
        let mut entries: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(s, t)| (*s, *t))
            .collect();
        entries.sort_by_key(|(s, _)| *s);
        entries
    }

    /// Remove and return every entry in one step
    pub fn drain(&self) -> Vec<(SessionId, PlatformToken)> {
        let mut entries: Vec<_> = self.entries.lock().drain().collect();
        entries.sort_by_key(|(s, _)| *s);
        entries
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn sid(raw: i64) -> SessionId {
        SessionId::new(raw).unwrap()
    }

    #[test]
    fn test_put_and_lookup_round_trip() {
        let registry = SessionRegistry::new();
        let t1 = PlatformToken::new();
        let t2 = PlatformToken::new();

        registry.put(sid(500), t1).unwrap();
        registry.put(sid(501), t2).unwrap();

        assert_eq!(registry.token_for(sid(500)), Some(t1));
        assert_eq!(registry.session_for(&t2), Some(sid(501)));
        for (session, token) in registry.all_entries() {
            assert_eq!(registry.token_for(registry.session_for(&token).unwrap()), Some(token));
            assert_eq!(registry.session_for(&registry.token_for(session).unwrap()), Some(session));
        }
    }

    #[test]
    fn test_put_rejects_double_registration() {
        let registry = SessionRegistry::new();
        let t1 = PlatformToken::new();
        registry.put(sid(500), t1).unwrap();

        let err = registry.put(sid(500), PlatformToken::new()).unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateRegistration { .. }));
        assert_eq!(registry.token_for(sid(500)), Some(t1));

        // Same token for a different session
        assert!(registry.put(sid(501), t1).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let registry = SessionRegistry::new();
        let t1 = PlatformToken::new();
        registry.put(sid(500), t1).unwrap();

        assert_eq!(registry.remove(sid(500)), Some(t1));
        assert_eq!(registry.token_for(sid(500)), None);
        assert_eq!(registry.session_for(&t1), None);
        assert_eq!(registry.remove(sid(500)), None);
    }

    #[test]
    fn test_drain_and_clear() {
        let registry = SessionRegistry::new();
        for raw in [3, 1, 2] {
            registry.put(sid(raw), PlatformToken::new()).unwrap();
        }
        let drained = registry.drain();
        assert_eq!(
            drained.iter().map(|(s, _)| s.get()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(registry.is_empty());

        registry.put(sid(7), PlatformToken::new()).unwrap();
        registry.clear();
        assert!(registry.all_entries().is_empty());
    }

    #[test]
    fn test_uniqueness_under_interleaved_put_remove() {
        let registry = SessionRegistry::new();
        let mut expected: Vec<(SessionId, PlatformToken)> = Vec::new();

        // Deterministic pseudo-random sequence of puts and removes
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let session = sid(i64::from(seed % 8));
            if seed % 3 == 0 {
                let removed = registry.remove(session);
                let pos = expected.iter().position(|(s, _)| *s == session);
                assert_eq!(removed, pos.map(|p| expected.remove(p).1));
                assert_eq!(registry.token_for(session), None);
            } else {
                let token = PlatformToken::new();
                let result = registry.put(session, token);
                if expected.iter().any(|(s, _)| *s == session) {
                    assert!(result.is_err());
                } else {
                    assert!(result.is_ok());
                    expected.push((session, token));
                }
            }

            let tokens: HashSet<_> = registry.all_entries().into_iter().map(|(_, t)| t).collect();
            assert_eq!(tokens.len(), registry.len());
        }
    }

    #[test]
    fn test_concurrent_access_is_linearizable() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let session = sid(i * 1000 + round);
                        let token = PlatformToken::new();
                        registry.put(session, token).unwrap();
                        assert_eq!(registry.session_for(&token), Some(session));
                        assert_eq!(registry.remove(session), Some(token));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
