//! Vendor engine seam
//!
//! The SIP/media engine is a closed binary. This module describes it from the bridge's
//! point of view:
//!
//! - [`SipEngine`] - the call-control operations the bridge invokes. Every operation returns
//!   the vendor's raw result code: `0` (or a non-negative id) on success, negative on failure.
//! - [`VendorCallbacks`] - the engine's full callback surface, one default no-op method per
//!   vendor notification.
//! - [`SdkEvent`] - the handful of notifications the bridge actually consumes.
//! - [`SdkEventTranslator`] - implements [`VendorCallbacks`] and reduces it to [`SdkEvent`].

use std::sync::{Arc, Weak};

use crate::config::{AudioCodec, DtmfMethod, InitializeConfig, Platform, SipAccount, SrtpPolicy};
use crate::types::SessionId;

/// Operations exposed by the vendor engine
pub trait SipEngine: Send + Sync {
    /// Platform the engine binary was built for
    fn platform(&self) -> Platform;

    /// Install the callback receiver; replaces any previous one
    fn set_callbacks(&self, callbacks: Arc<dyn VendorCallbacks>);

    fn initialize(&self, config: &InitializeConfig) -> i32;
    fn uninitialize(&self);
    fn set_license_key(&self, key: &str) -> i32;

    fn set_user(&self, account: &SipAccount) -> i32;
    fn register_server(&self, timeout_secs: u32, retry_times: u32) -> i32;
    fn unregister_server(&self) -> i32;

    /// Place a call; returns the new session id, or a negative error code
    fn call(&self, callee: &str, send_sdp: bool, video_call: bool) -> i64;
    fn hang_up(&self, session_id: i32) -> i32;
    fn hold(&self, session_id: i32) -> i32;
    fn un_hold(&self, session_id: i32) -> i32;
    fn mute_session(
        &self,
        session_id: i32,
        mute_incoming_audio: bool,
        mute_outgoing_audio: bool,
        mute_incoming_video: bool,
        mute_outgoing_video: bool,
    ) -> i32;
    fn set_loudspeaker_status(&self, enable: bool) -> i32;
    fn send_dtmf(
        &self,
        session_id: i32,
        method: DtmfMethod,
        code: u8,
        duration_ms: u32,
        play_tone: bool,
    ) -> i32;

    fn set_audio_codecs(&self, codecs: &[AudioCodec]) -> i32;
    fn set_srtp_policy(&self, policy: SrtpPolicy) -> i32;
    fn enable_3gpp_tags(&self, enable: bool) -> i32;
    fn enable_cng(&self, enable: bool) -> i32;
    fn enable_vad(&self, enable: bool) -> i32;
    /// Only called on platforms whose engine exposes it, see [`CallControl`](crate::control::CallControl)
    fn enable_aec(&self, enable: bool) -> i32;
    fn enable_agc(&self, enable: bool) -> i32;
    fn enable_ans(&self, enable: bool) -> i32;
    fn enable_audio_manager(&self, enable: bool) -> i32;
}

/// Caller/callee identities attached to invite callbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteParties {
    pub caller_display_name: String,
    pub caller: String,
    pub callee_display_name: String,
    pub callee: String,
}

/// Negotiated media summary attached to invite callbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSummary {
    pub audio_codecs: String,
    pub video_codecs: String,
    pub exists_audio: bool,
    pub exists_video: bool,
}

/// Full vendor callback surface.
///
/// Session ids arrive as the engine's raw `i64`. Everything defaults to a no-op.
#[allow(unused_variables)]
pub trait VendorCallbacks: Send + Sync {
    fn on_register_success(&self, status_text: &str, status_code: i32, sip_message: &str) {}
    fn on_register_failure(&self, status_text: &str, status_code: i32, sip_message: &str) {}

    fn on_invite_incoming(&self, session_id: i64, parties: &InviteParties, media: &MediaSummary, sip_message: &str) {}
    fn on_invite_trying(&self, session_id: i64) {}
    fn on_invite_session_progress(&self, session_id: i64, media: &MediaSummary, exists_early_media: bool, sip_message: &str) {}
    fn on_invite_ringing(&self, session_id: i64, status_text: &str, status_code: i32, sip_message: &str) {}
    fn on_invite_answered(&self, session_id: i64, parties: &InviteParties, media: &MediaSummary, sip_message: &str) {}
    fn on_invite_failure(&self, session_id: i64, parties: &InviteParties, reason: &str, code: i32, sip_message: &str) {}
    fn on_invite_updated(&self, session_id: i64, media: &MediaSummary, sip_message: &str) {}
    fn on_invite_connected(&self, session_id: i64) {}
    fn on_invite_beginning_forward(&self, forward_to: &str) {}
    fn on_invite_closed(&self, session_id: i64, sip_message: &str) {}
    fn on_dialog_state_updated(&self, blf_monitored_uri: &str, blf_dialog_state: &str, blf_dialog_id: &str, blf_dialog_direction: &str) {}

    fn on_remote_hold(&self, session_id: i64) {}
    fn on_remote_unhold(&self, session_id: i64, media: &MediaSummary) {}

    fn on_received_refer(&self, session_id: i64, refer_id: i64, to: &str, from: &str, refer_sip_message: &str) {}
    fn on_refer_accepted(&self, session_id: i64) {}
    fn on_refer_rejected(&self, session_id: i64, reason: &str, code: i32) {}
    fn on_transfer_trying(&self, session_id: i64) {}
    fn on_transfer_ringing(&self, session_id: i64) {}
    fn on_actv_transfer_success(&self, session_id: i64) {}
    fn on_actv_transfer_failure(&self, session_id: i64, reason: &str, code: i32) {}

    fn on_received_signaling(&self, session_id: i64, message: &str) {}
    fn on_sending_signaling(&self, session_id: i64, message: &str) {}
    fn on_waiting_voice_message(&self, message_account: &str, urgent_new: i32, urgent_old: i32, new_count: i32, old_count: i32) {}
    fn on_recv_dtmf_tone(&self, session_id: i64, tone: i32) {}
    fn on_recv_options(&self, options_message: &str) {}
    fn on_recv_info(&self, info_message: &str) {}
    fn on_recv_message(&self, session_id: i64, mime_type: &str, sub_mime_type: &str, data: &[u8]) {}
    fn on_presence_online(&self, from_display_name: &str, from: &str, state_text: &str) {}
    fn on_presence_offline(&self, from_display_name: &str, from: &str) {}
    fn on_play_file_finished(&self, session_id: i64, file_name: &str) {}
    fn on_statistics(&self, session_id: i64, statistics: &str) {}
    fn on_audio_device_changed(&self, current_device: &str, available_devices: &[String]) {}
}

/// Engine notifications consumed by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    RegisterSuccess {
        status_text: String,
        status_code: i32,
    },
    RegisterFailure {
        status_text: String,
        status_code: i32,
    },
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
}

impl SdkEvent {
    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::RegisterSuccess { .. } | Self::RegisterFailure { .. } => None,
            Self::InviteTrying { session_id }
            | Self::InviteRinging { session_id, .. }
            | Self::InviteAnswered { session_id, .. }
            | Self::InviteConnected { session_id }
            | Self::InviteClosed { session_id }
            | Self::InviteFailure { session_id, .. }
            | Self::RemoteHold { session_id }
            | Self::RemoteUnHold { session_id, .. } => Some(*session_id),
        }
    }
}

/// Receiver of reduced engine events
pub trait SdkEventSink: Send + Sync {
    fn on_sdk_event(&self, event: SdkEvent);
}

/// Reduces the vendor callback surface to [`SdkEvent`]s.
///
/// Holds its sink weakly: the engine owns the translator, and the sink usually owns the engine.
pub struct SdkEventTranslator {
    sink: Weak<dyn SdkEventSink>,
}

impl SdkEventTranslator {
    pub fn new(sink: Weak<dyn SdkEventSink>) -> Self {
        Self { sink }
    }

    fn deliver(&self, event: SdkEvent) {
        match self.sink.upgrade() {
            Some(sink) => sink.on_sdk_event(event),
            None => tracing::debug!("Dropping {:?}, bridge is gone", event),
        }
    }

    fn deliver_for(&self, raw_session: i64, build: impl FnOnce(SessionId) -> SdkEvent) {
        match SessionId::new(raw_session) {
            Ok(session_id) => self.deliver(build(session_id)),
            Err(e) => tracing::warn!("Ignoring engine callback: {}", e),
        }
    }
}

impl VendorCallbacks for SdkEventTranslator {
    fn on_register_success(&self, status_text: &str, status_code: i32, _sip_message: &str) {
        self.deliver(SdkEvent::RegisterSuccess {
            status_text: status_text.to_string(),
            status_code,
        });
    }

    fn on_register_failure(&self, status_text: &str, status_code: i32, _sip_message: &str) {
        self.deliver(SdkEvent::RegisterFailure {
            status_text: status_text.to_string(),
            status_code,
        });
    }

    fn on_invite_incoming(&self, session_id: i64, parties: &InviteParties, _media: &MediaSummary, _sip_message: &str) {
        // Incoming calls are not supported
        tracing::warn!("Ignoring incoming call {} from {}", session_id, parties.caller);
    }

    fn on_invite_trying(&self, session_id: i64) {
        self.deliver_for(session_id, |session_id| SdkEvent::InviteTrying { session_id });
    }

    fn on_invite_ringing(&self, session_id: i64, status_text: &str, status_code: i32, _sip_message: &str) {
        self.deliver_for(session_id, |session_id| SdkEvent::InviteRinging {
            session_id,
            status_text: status_text.to_string(),
            status_code,
        });
    }

    fn on_invite_answered(&self, session_id: i64, _parties: &InviteParties, media: &MediaSummary, _sip_message: &str) {
        self.deliver_for(session_id, |session_id| SdkEvent::InviteAnswered {
            session_id,
            has_audio: media.exists_audio,
            has_video: media.exists_video,
        });
    }

    fn on_invite_failure(&self, session_id: i64, _parties: &InviteParties, reason: &str, code: i32, _sip_message: &str) {
        self.deliver_for(session_id, |session_id| SdkEvent::InviteFailure {
            session_id,
            reason: reason.to_string(),
            code,
        });
    }

    fn on_invite_connected(&self, session_id: i64) {
        self.deliver_for(session_id, |session_id| SdkEvent::InviteConnected { session_id });
    }

    fn on_invite_closed(&self, session_id: i64, _sip_message: &str) {
        self.deliver_for(session_id, |session_id| SdkEvent::InviteClosed { session_id });
    }

    fn on_remote_hold(&self, session_id: i64) {
        self.deliver_for(session_id, |session_id| SdkEvent::RemoteHold { session_id });
    }

    fn on_remote_unhold(&self, session_id: i64, media: &MediaSummary) {
        self.deliver_for(session_id, |session_id| SdkEvent::RemoteUnHold {
            session_id,
            has_audio: media.exists_audio,
            has_video: media.exists_video,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<SdkEvent>>);

    impl SdkEventSink for Collect {
        fn on_sdk_event(&self, event: SdkEvent) {
            self.0.lock().push(event);
        }
    }

    fn translator() -> (Arc<Collect>, SdkEventTranslator) {
        let sink = Arc::new(Collect::default());
        let weak: Weak<dyn SdkEventSink> = Arc::downgrade(&(sink.clone() as Arc<dyn SdkEventSink>));
        (sink, SdkEventTranslator::new(weak))
    }

    #[test]
    fn test_consumed_callbacks_are_translated() {
        let (sink, translator) = translator();
        let media = MediaSummary {
            exists_audio: true,
            ..Default::default()
        };

        translator.on_invite_ringing(500, "Ringing", 180, "");
        translator.on_invite_answered(500, &InviteParties::default(), &media, "");
        translator.on_register_failure("Forbidden", 403, "");

        let events = sink.0.lock().clone();
        let id = SessionId::new(500).unwrap();
        assert_eq!(
            events,
            vec![
                SdkEvent::InviteRinging { session_id: id, status_text: "Ringing".into(), status_code: 180 },
                SdkEvent::InviteAnswered { session_id: id, has_audio: true, has_video: false },
                SdkEvent::RegisterFailure { status_text: "Forbidden".into(), status_code: 403 },
            ]
        );
        assert_eq!(events[0].session_id(), Some(id));
        assert_eq!(events[2].session_id(), None);
    }

    #[test]
    fn test_unconsumed_and_invalid_callbacks_are_dropped() {
        let (sink, translator) = translator();

        translator.on_invite_incoming(3, &InviteParties::default(), &MediaSummary::default(), "");
        translator.on_recv_dtmf_tone(3, 5);
        translator.on_statistics(3, "{}");
        translator.on_invite_closed(-1, "");
        translator.on_invite_trying(i64::from(i32::MAX) + 1);

        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_translator_outliving_sink_is_silent() {
        let (sink, translator) = translator();
        drop(sink);
        translator.on_invite_closed(1, "");
    }
}
