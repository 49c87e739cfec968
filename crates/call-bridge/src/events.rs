//! Event system for the call bridge
//!
//! One broadcast channel carries every [`BridgeEvent`]. Each subscriber sees every event
//! published after it subscribed, in the order each publisher produced them. Events from the
//! engine and from the native call UI may interleave in either order for the same session;
//! consumers correlate by `session_id`.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::sdk::SdkEvent;
use crate::types::SessionId;

/// Events delivered to the application layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeEvent {
    // Registration events
    RegisterSuccess {
        status_text: String,
        status_code: i32,
    },
    RegisterFailure {
        status_text: String,
        status_code: i32,
    },

    // Call events from the engine
    InviteTrying {
        session_id: SessionId,
    },
    InviteRinging {
        session_id: SessionId,
        status_text: String,
        status_code: i32,
    },
    InviteAnswered {
        session_id: SessionId,
        has_audio: bool,
        has_video: bool,
    },
    InviteConnected {
        session_id: SessionId,
    },
    InviteClosed {
        session_id: SessionId,
    },
    InviteFailure {
        session_id: SessionId,
        reason: String,
        code: i32,
    },
    RemoteHold {
        session_id: SessionId,
    },
    RemoteUnHold {
        session_id: SessionId,
        has_audio: bool,
        has_video: bool,
    },

    // Actions taken in the native call UI
    NativeUiHold {
        session_id: SessionId,
        on_hold: bool,
    },
    NativeUiMute {
        session_id: SessionId,
        muted: bool,
    },
    NativeUiSpeaker {
        enabled: bool,
    },
    NativeUiDtmf {
        session_id: SessionId,
        digits: String,
    },
    NativeUiEndCall {
        session_id: SessionId,
    },
    /// The OS refused or lost a call; the engine session has been terminated
    NativeUiFailure {
        session_id: SessionId,
        reason: String,
    },
}

impl BridgeEvent {
    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::RegisterSuccess { .. } | Self::RegisterFailure { .. } | Self::NativeUiSpeaker { .. } => None,
            Self::InviteTrying { session_id }
            | Self::InviteRinging { session_id, .. }
            | Self::InviteAnswered { session_id, .. }
            | Self::InviteConnected { session_id }
            | Self::InviteClosed { session_id }
            | Self::InviteFailure { session_id, .. }
            | Self::RemoteHold { session_id }
            | Self::RemoteUnHold { session_id, .. }
            | Self::NativeUiHold { session_id, .. }
            | Self::NativeUiMute { session_id, .. }
            | Self::NativeUiDtmf { session_id, .. }
            | Self::NativeUiEndCall { session_id }
            | Self::NativeUiFailure { session_id, .. } => Some(*session_id),
        }
    }

    /// Encode for the platform event channel
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<SdkEvent> for BridgeEvent {
    fn from(event: SdkEvent) -> Self {
        match event {
            SdkEvent::RegisterSuccess { status_text, status_code } => Self::RegisterSuccess { status_text, status_code },
            SdkEvent::RegisterFailure { status_text, status_code } => Self::RegisterFailure { status_text, status_code },
            SdkEvent::InviteTrying { session_id } => Self::InviteTrying { session_id },
            SdkEvent::InviteRinging { session_id, status_text, status_code } => Self::InviteRinging {
                session_id,
                status_text,
                status_code,
            },
            SdkEvent::InviteAnswered { session_id, has_audio, has_video } => Self::InviteAnswered {
                session_id,
                has_audio,
                has_video,
            },
            SdkEvent::InviteConnected { session_id } => Self::InviteConnected { session_id },
            SdkEvent::InviteClosed { session_id } => Self::InviteClosed { session_id },
            SdkEvent::InviteFailure { session_id, reason, code } => Self::InviteFailure { session_id, reason, code },
            SdkEvent::RemoteHold { session_id } => Self::RemoteHold { session_id },
            SdkEvent::RemoteUnHold { session_id, has_audio, has_video } => Self::RemoteUnHold {
                session_id,
                has_audio,
                has_video,
            },
        }
    }
}

/// Event stream type
pub type EventStream = BroadcastStream<BridgeEvent>;

/// Event forwarder for the call bridge
#[derive(Debug, Clone)]
pub struct EventForwarder {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventForwarder {
    /// Create a new forwarder; `capacity` bounds how far a slow subscriber may lag
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event
    pub fn emit(&self, event: BridgeEvent) {
        tracing::debug!("Event: {:?}", event);
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe as a stream
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe with the raw broadcast receiver
    pub fn subscribe_raw(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventForwarder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn sid(raw: i64) -> SessionId {
        SessionId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_later_events_in_order() {
        let forwarder = EventForwarder::default();
        forwarder.emit(BridgeEvent::InviteTrying { session_id: sid(1) });

        let mut first = forwarder.subscribe();
        let mut second = forwarder.subscribe();
        assert_eq!(forwarder.receiver_count(), 2);

        forwarder.emit(BridgeEvent::InviteConnected { session_id: sid(1) });
        forwarder.emit(BridgeEvent::InviteClosed { session_id: sid(1) });

        for stream in [&mut first, &mut second] {
            assert_eq!(
                stream.next().await.unwrap().unwrap(),
                BridgeEvent::InviteConnected { session_id: sid(1) }
            );
            assert_eq!(
                stream.next().await.unwrap().unwrap(),
                BridgeEvent::InviteClosed { session_id: sid(1) }
            );
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let forwarder = EventForwarder::new(4);
        forwarder.emit(BridgeEvent::NativeUiSpeaker { enabled: true });
        assert_eq!(forwarder.receiver_count(), 0);
    }

    #[test]
    fn test_json_encoding() {
        let event = BridgeEvent::InviteFailure {
            session_id: sid(500),
            reason: "Busy Here".into(),
            code: 486,
        };
        assert_eq!(
            event.to_json(),
            serde_json::json!({
                "event": "inviteFailure",
                "sessionId": 500,
                "reason": "Busy Here",
                "code": 486,
            })
        );
        assert_eq!(event.session_id(), Some(sid(500)));

        let speaker = BridgeEvent::NativeUiSpeaker { enabled: false };
        assert_eq!(speaker.to_json()["event"], "nativeUiSpeaker");
        assert_eq!(speaker.session_id(), None);
    }

    #[test]
    fn test_sdk_event_conversion_keeps_payload() {
        let converted = BridgeEvent::from(SdkEvent::RemoteUnHold {
            session_id: sid(3),
            has_audio: true,
            has_video: false,
        });
        assert_eq!(
            converted,
            BridgeEvent::RemoteUnHold { session_id: sid(3), has_audio: true, has_video: false }
        );
    }
}
