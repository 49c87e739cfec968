//! Bridge lifecycle guard
//!
//! `Uninitialized -> Initialized -> Disposed`, forward only. Operations hold a shared lock
//! for their whole duration so `dispose` can never run underneath them.

use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Disposed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct LifecycleGuard {
    state: RwLock<LifecycleState>,
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read_recursive()
    }

    /// Run `init` and move to `Initialized` if it succeeds.
    ///
    /// Only legal from `Uninitialized`; a failed `init` leaves the state unchanged.
    pub fn initialize_with<R>(&self, init: impl FnOnce() -> BridgeResult<R>) -> BridgeResult<R> {
        let mut state = self.state.write();
        if *state != LifecycleState::Uninitialized {
            return Err(BridgeError::lifecycle("initialize", *state));
        }
        let result = init()?;
        *state = LifecycleState::Initialized;
        tracing::info!("Bridge initialized");
        Ok(result)
    }

    /// Run `op` while the bridge is initialized
    pub fn with_initialized<R>(
        &self,
        operation: &'static str,
        op: impl FnOnce() -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let state = self.state.read_recursive();
        if *state != LifecycleState::Initialized {
            tracing::warn!("{} rejected: bridge is {}", operation, *state);
            return Err(BridgeError::lifecycle(operation, *state));
        }
        op()
    }

    /// Run `op` unless the bridge is disposed; for settings that may precede `initialize`
    pub fn with_live<R>(&self, operation: &'static str, op: impl FnOnce() -> BridgeResult<R>) -> BridgeResult<R> {
        let state = self.state.read_recursive();
        if *state == LifecycleState::Disposed {
            tracing::warn!("{} rejected: bridge is disposed", operation);
            return Err(BridgeError::lifecycle(operation, *state));
        }
        op()
    }

    /// Run `teardown` and move to `Disposed`.
    ///
    /// `teardown` receives the state being left. Disposing twice is an error.
    pub fn dispose_with(&self, teardown: impl FnOnce(LifecycleState)) -> BridgeResult<()> {
        let mut state = self.state.write();
        if *state == LifecycleState::Disposed {
            return Err(BridgeError::lifecycle("dispose", *state));
        }
        teardown(*state);
        *state = LifecycleState::Disposed;
        tracing::info!("Bridge disposed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        let guard = LifecycleGuard::new();
        assert!(guard.with_initialized("hangUp", || Ok(())).is_err());

        guard.initialize_with(|| Ok(())).unwrap();
        assert_eq!(guard.state(), LifecycleState::Initialized);
        assert_eq!(guard.with_initialized("hangUp", || Ok(7)).unwrap(), 7);

        for _ in 0..2 {
            let err = guard.initialize_with(|| Ok(())).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Lifecycle { operation: "initialize", state: LifecycleState::Initialized }
            ));
        }

        guard.dispose_with(|_| {}).unwrap();
        assert!(matches!(
            guard.with_initialized("hangUp", || Ok(())),
            Err(BridgeError::Lifecycle { state: LifecycleState::Disposed, .. })
        ));
        assert!(guard.dispose_with(|_| {}).is_err());
        assert!(guard.initialize_with(|| Ok(())).is_err());
    }

    #[test]
    fn test_failed_initialize_can_be_retried() {
        let guard = LifecycleGuard::new();
        let err = guard
            .initialize_with(|| BridgeError::check_code("initialize", -60003))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Sdk { code: -60003, .. }));
        assert_eq!(guard.state(), LifecycleState::Uninitialized);

        guard.initialize_with(|| Ok(())).unwrap();
        assert_eq!(guard.state(), LifecycleState::Initialized);
    }

    #[test]
    fn test_dispose_before_initialize() {
        let guard = LifecycleGuard::new();
        let mut left = None;
        guard.dispose_with(|from| left = Some(from)).unwrap();
        assert_eq!(left, Some(LifecycleState::Uninitialized));
        assert_eq!(guard.state(), LifecycleState::Disposed);
    }

    #[test]
    fn test_live_operations_only_stop_at_dispose() {
        let guard = LifecycleGuard::new();
        assert!(guard.with_live("configureCallKit", || Ok(())).is_ok());
        guard.initialize_with(|| Ok(())).unwrap();
        assert!(guard.with_live("configureCallKit", || Ok(())).is_ok());
        guard.dispose_with(|_| {}).unwrap();
        assert!(guard.with_live("configureCallKit", || Ok(())).is_err());
    }
}
