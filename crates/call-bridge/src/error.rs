//! Error types for the call bridge

use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::types::SessionId;

/// Result type for call bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Local result code reported for lifecycle violations on the method channel.
pub const CODE_LIFECYCLE: i32 = -9001;
/// Local result code reported for validation failures on the method channel.
pub const CODE_VALIDATION: i32 = -9002;
/// Local result code reported when the OS rejected a native-UI call report.
pub const CODE_NATIVE_UI: i32 = -9003;
/// Local result code reported for any other local failure.
pub const CODE_INTERNAL: i32 = -9099;

/// Errors that can occur in the call bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Operation attempted in the wrong lifecycle state
    #[error("Lifecycle violation: {operation} is not allowed while {state}")]
    Lifecycle {
        operation: &'static str,
        state: LifecycleState,
    },

    /// Input rejected at the data-model boundary
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The vendor engine returned a negative result code
    #[error("SDK operation {operation} failed with code {code}")]
    Sdk { operation: &'static str, code: i32 },

    /// The OS refused to register an outgoing call with native call UI
    #[error("Native call UI rejected session {session_id}: {reason}")]
    NativeUiRegistration { session_id: SessionId, reason: String },

    /// The session is not tracked by the bridge
    #[error("Unknown session: {session_id}")]
    UnknownSession { session_id: SessionId },

    /// A platform token already exists for this session
    #[error("Session {session_id} already has a native call UI token")]
    DuplicateRegistration { session_id: SessionId },

    /// Native call UI integration is switched off
    #[error("Native call UI integration is disabled")]
    NativeUiDisabled,

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Method-channel payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Create a lifecycle violation error
    pub fn lifecycle(operation: &'static str, state: LifecycleState) -> Self {
        Self::Lifecycle { operation, state }
    }

    /// Create a validation error
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Turn a raw vendor result code into a result, keeping the code unchanged.
    pub fn check_code(operation: &'static str, code: i32) -> BridgeResult<()> {
        if code < 0 {
            Err(Self::Sdk { operation, code })
        } else {
            Ok(())
        }
    }

    /// Whether this error is a programming error rather than a runtime condition
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::Lifecycle { .. } | Self::DuplicateRegistration { .. }
        )
    }

    /// Integer result code for the method channel.
    ///
    /// Vendor codes pass through unchanged; local failures use the `CODE_*` constants.
    pub fn result_code(&self) -> i32 {
        match self {
            Self::Sdk { code, .. } => *code,
            Self::Lifecycle { .. } => CODE_LIFECYCLE,
            Self::Validation { .. } => CODE_VALIDATION,
            Self::NativeUiRegistration { .. } => CODE_NATIVE_UI,
            _ => CODE_INTERNAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_code_passes_vendor_code_through() {
        assert!(BridgeError::check_code("hangUp", 0).is_ok());
        assert!(BridgeError::check_code("makeCall", 42).is_ok());

        let err = BridgeError::check_code("hold", -60098).unwrap_err();
        assert!(matches!(err, BridgeError::Sdk { operation: "hold", code: -60098 }));
        assert_eq!(err.result_code(), -60098);
    }

    #[test]
    fn test_local_codes() {
        let err = BridgeError::lifecycle("makeCall", LifecycleState::Disposed);
        assert_eq!(err.result_code(), CODE_LIFECYCLE);
        assert!(err.is_programming_error());
        assert_eq!(
            err.to_string(),
            "Lifecycle violation: makeCall is not allowed while disposed"
        );

        let err = BridgeError::validation("localSipPort", "must be between 1 and 65535");
        assert_eq!(err.result_code(), CODE_VALIDATION);
        assert!(!err.is_programming_error());
    }
}
