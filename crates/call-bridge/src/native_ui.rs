//! Operating-system call UI seam
//!
//! [`NativeCallUi`] is what the bridge needs from CallKit (`CXProvider`) or ConnectionService
//! (a `Connection` per call plus the registered phone account). The platform glue implements
//! it and routes user actions back through
//! [`NativeCallUiAdapter::handle_action`](crate::adapter::NativeCallUiAdapter::handle_action),
//! each carrying an [`ActionAck`] that must be fulfilled or failed exactly once.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::NativeUiConfig;
use crate::types::PlatformToken;

/// Failure reported by the OS call UI
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct NativeUiError {
    pub reason: String,
}

impl NativeUiError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why a call left the native call UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// Ended from this device through the application
    LocalEnded,
    RemoteEnded,
    Unanswered,
    Failed,
}

/// OS call UI provider for one configuration.
///
/// Implementations must not call back into the bridge synchronously from these methods.
pub trait NativeCallUi: Send + Sync {
    /// Announce a new outgoing call. Rejection means the OS will not show the call.
    fn report_outgoing_call(&self, token: PlatformToken, handle: &str, has_video: bool) -> Result<(), NativeUiError>;
    fn report_started_connecting(&self, token: PlatformToken) -> Result<(), NativeUiError>;
    fn report_connected(&self, token: PlatformToken) -> Result<(), NativeUiError>;
    fn report_ended(&self, token: PlatformToken, reason: EndReason) -> Result<(), NativeUiError>;
    fn report_held(&self, token: PlatformToken, on_hold: bool) -> Result<(), NativeUiError>;
    fn report_muted(&self, token: PlatformToken, muted: bool) -> Result<(), NativeUiError>;
    fn report_dtmf(&self, token: PlatformToken, digits: &str) -> Result<(), NativeUiError>;
    /// Release the provider; no further reports follow
    fn invalidate(&self);
}

/// Host environment handle (Android activity, iOS scene).
///
/// Held only between `attach_host` and `detach_host`.
pub trait HostContext: Send + Sync {
    /// Whether the host is still usable
    fn is_alive(&self) -> bool;
}

/// Creates a provider each time native call UI is switched on
pub trait NativeCallUiFactory: Send + Sync {
    fn create(
        &self,
        config: &NativeUiConfig,
        host: Option<Arc<dyn HostContext>>,
    ) -> Result<Arc<dyn NativeCallUi>, NativeUiError>;
}

/// User action arriving from the OS call UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeAction {
    End,
    SetHeld(bool),
    SetMuted(bool),
    PlayDtmf(String),
}

/// How an OS action was completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Fulfilled,
    Failed,
}

type Completion = Box<dyn FnOnce(ActionOutcome) + Send>;

/// Completion handle of an OS action (`CXAction.fulfill()/fail()` on iOS).
///
/// Dropping an unanswered ack fails the action, so the OS never shows a stuck call.
pub struct ActionAck {
    completion: Option<Completion>,
}

impl ActionAck {
    pub fn new(completion: impl FnOnce(ActionOutcome) + Send + 'static) -> Self {
        Self {
            completion: Some(Box::new(completion)),
        }
    }

    /// An ack nobody listens to
    pub fn detached() -> Self {
        Self { completion: None }
    }

    pub fn fulfill(mut self) {
        self.complete(ActionOutcome::Fulfilled);
    }

    pub fn fail(mut self) {
        self.complete(ActionOutcome::Failed);
    }

    fn complete(&mut self, outcome: ActionOutcome) {
        if let Some(completion) = self.completion.take() {
            completion(outcome);
        }
    }
}

impl Drop for ActionAck {
    fn drop(&mut self) {
        if self.completion.is_some() {
            tracing::warn!("OS call action dropped without completion, failing it");
            self.complete(ActionOutcome::Failed);
        }
    }
}

impl fmt::Debug for ActionAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionAck")
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (ActionAck, Arc<Mutex<Vec<ActionOutcome>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (ActionAck::new(move |o| sink.lock().push(o)), seen)
    }

    #[test]
    fn test_ack_completes_once() {
        let (ack, seen) = recorder();
        ack.fulfill();
        assert_eq!(*seen.lock(), vec![ActionOutcome::Fulfilled]);

        let (ack, seen) = recorder();
        ack.fail();
        assert_eq!(*seen.lock(), vec![ActionOutcome::Failed]);
    }

    #[test]
    fn test_dropped_ack_fails_the_action() {
        let (ack, seen) = recorder();
        drop(ack);
        assert_eq!(*seen.lock(), vec![ActionOutcome::Failed]);

        ActionAck::detached().fulfill();
    }
}
