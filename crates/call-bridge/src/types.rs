//! Core data model shared by the registry, adapter and bridge
//!
//! - [`SessionId`] - engine-assigned call identifier, validated to the signed 32-bit range
//! - [`PlatformToken`] - native call UI identifier for a call
//! - [`CallLifecycleState`] - the subset of call state needed to pick the next native-UI transition
//! - [`CallSession`] - one tracked call

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};

/// Engine-assigned identifier of one call session.
///
/// Always non-negative and inside `i32` range. `-1` is the engine's "no session" sentinel
/// and is never a valid `SessionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct SessionId(i32);

impl SessionId {
    /// Sentinel the engine uses for an unset or invalid session.
    pub const INVALID: i64 = -1;

    /// Validate a raw id coming from the engine or the application.
    pub fn new(raw: i64) -> BridgeResult<Self> {
        if raw < 0 || raw > i64::from(i32::MAX) {
            return Err(BridgeError::validation(
                "sessionId",
                format!("{} is outside 0..={}", raw, i32::MAX),
            ));
        }
        Ok(Self(raw as i32))
    }

    /// Raw value as handed to the engine.
    pub fn get(self) -> i32 {
        self.0
    }
}

impl TryFrom<i64> for SessionId {
    type Error = BridgeError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<SessionId> for i64 {
    fn from(id: SessionId) -> Self {
        i64::from(id.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Native call UI identifier for one call (a CallKit UUID, or the key of a
/// ConnectionService connection). Never reused across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformToken(Uuid);

impl PlatformToken {
    /// Allocate a fresh token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap a token the OS handed back.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlatformToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlatformToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a call. Only outgoing calls are placed through this bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallDirection {
    Outgoing,
}

/// Locally tracked call state.
///
/// Mirrors the engine's own state only as far as needed to decide which native-UI
/// transition is legal next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallLifecycleState {
    Dialing,
    Ringing,
    Connected,
    Held,
    Ended,
    Failed,
}

impl CallLifecycleState {
    /// Whether the call is over
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Re-entering the current state is not a transition; callers treat it as a no-op.
    pub fn can_transition_to(self, next: Self) -> bool {
        use CallLifecycleState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Ended | Failed) => true,
            (Dialing, Ringing | Connected) => true,
            (Ringing, Connected) => true,
            (Connected, Held) => true,
            (Held, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dialing => "dialing",
            Self::Ringing => "ringing",
            Self::Connected => "connected",
            Self::Held => "held",
            Self::Ended => "ended",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One call known to the signaling layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub session_id: SessionId,
    pub callee: String,
    pub direction: CallDirection,
    /// Fixed when the call is created
    pub has_video: bool,
    pub state: CallLifecycleState,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    /// A freshly dialed outgoing call
    pub fn outgoing(session_id: SessionId, callee: impl Into<String>, has_video: bool) -> Self {
        Self {
            session_id,
            callee: callee.into(),
            direction: CallDirection::Outgoing,
            has_video,
            state: CallLifecycleState::Dialing,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_range() {
        assert_eq!(SessionId::new(500).unwrap().get(), 500);
        assert_eq!(SessionId::new(i64::from(i32::MAX)).unwrap().get(), i32::MAX);
        assert!(SessionId::new(0).is_ok());

        assert!(SessionId::new(SessionId::INVALID).is_err());
        assert!(SessionId::new(i64::from(i32::MAX) + 1).is_err());
        assert!(SessionId::new(i64::from(i32::MIN)).is_err());
    }

    #[test]
    fn test_session_id_serde_rejects_out_of_range() {
        let id: SessionId = serde_json::from_str("500").unwrap();
        assert_eq!(id.get(), 500);
        assert_eq!(serde_json::to_string(&id).unwrap(), "500");

        assert!(serde_json::from_str::<SessionId>("-1").is_err());
        assert!(serde_json::from_str::<SessionId>("2147483648").is_err());
    }

    #[test]
    fn test_platform_tokens_are_unique() {
        let a = PlatformToken::new();
        let b = PlatformToken::new();
        assert_ne!(a, b);
        assert_eq!(PlatformToken::from_uuid(*a.as_uuid()), a);
    }

    #[test]
    fn test_lifecycle_transitions() {
        use CallLifecycleState::*;

        assert!(Dialing.can_transition_to(Ringing));
        assert!(Dialing.can_transition_to(Connected));
        assert!(Ringing.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Held));
        assert!(Held.can_transition_to(Connected));
        assert!(Held.can_transition_to(Ended));
        assert!(Dialing.can_transition_to(Failed));

        assert!(!Connected.can_transition_to(Ringing));
        assert!(!Ringing.can_transition_to(Held));
        assert!(!Connected.can_transition_to(Connected));
        assert!(!Ended.can_transition_to(Connected));
        assert!(!Failed.can_transition_to(Ended));
    }
}
