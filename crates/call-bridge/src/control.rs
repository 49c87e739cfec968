//! Call-control facade
//!
//! Thin synchronous wrapper over [`SipEngine`]. Every operation runs inside one serialization
//! domain that engine-callback delivery also enters (see [`CallControl::serialize`]), so an
//! application-initiated `hang_up` and an in-flight `InviteAnswered` for the same session
//! never interleave. The lock is reentrant: engines are allowed to deliver callbacks
//! synchronously from inside an operation.
//!
//! Result codes are passed through untouched; negative codes become
//! [`BridgeError::Sdk`] carrying the vendor value.

use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::config::{AudioCodec, DtmfMethod, InitializeConfig, Platform, SipAccount, SrtpPolicy};
use crate::error::{BridgeError, BridgeResult};
use crate::sdk::SipEngine;
use crate::types::SessionId;

pub struct CallControl {
    engine: Arc<dyn SipEngine>,
    serial: ReentrantMutex<()>,
}

impl std::fmt::Debug for CallControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallControl")
            .field("engine", &"<vendor engine>")
            .field("platform", &self.engine.platform())
            .finish()
    }
}

macro_rules! forward {
    ($self:ident, $op:literal, $call:expr) => {{
        let _serial = $self.serial.lock();
        let code = $call;
        tracing::debug!("{} -> {}", $op, code);
        BridgeError::check_code($op, code)
    }};
}

impl CallControl {
    pub fn new(engine: Arc<dyn SipEngine>) -> Self {
        Self {
            engine,
            serial: ReentrantMutex::new(()),
        }
    }

    pub fn platform(&self) -> Platform {
        self.engine.platform()
    }

    /// Run `f` inside the facade's serialization domain
    pub fn serialize<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.serial.lock();
        f()
    }

    pub fn initialize(&self, config: &InitializeConfig) -> BridgeResult<()> {
        forward!(self, "initialize", self.engine.initialize(config))
    }

    pub fn uninitialize(&self) {
        let _serial = self.serial.lock();
        self.engine.uninitialize();
        tracing::debug!("uninitialize");
    }

    pub fn set_license_key(&self, key: &str) -> BridgeResult<()> {
        forward!(self, "setLicenseKey", self.engine.set_license_key(key))
    }

    pub fn register(&self, account: &SipAccount) -> BridgeResult<()> {
        forward!(self, "register", self.engine.set_user(account))
    }

    pub fn register_server(&self, timeout_secs: u32, retry_times: u32) -> BridgeResult<()> {
        forward!(self, "registerServer", self.engine.register_server(timeout_secs, retry_times))
    }

    pub fn unregister(&self) -> BridgeResult<()> {
        forward!(self, "unRegister", self.engine.unregister_server())
    }

    /// Place a call and return the engine-assigned session id
    pub fn make_call(&self, callee: &str, send_sdp: bool, video_call: bool) -> BridgeResult<SessionId> {
        let _serial = self.serial.lock();
        let raw = self.engine.call(callee, send_sdp, video_call);
        tracing::debug!("makeCall {} -> {}", callee, raw);
        if raw < 0 {
            // Vendor codes fit in i32; anything wider is clamped rather than wrapped
            let code = i32::try_from(raw).unwrap_or(i32::MIN);
            return Err(BridgeError::Sdk { operation: "makeCall", code });
        }
        SessionId::new(raw)
    }

    pub fn hang_up(&self, session_id: SessionId) -> BridgeResult<()> {
        forward!(self, "hangUp", self.engine.hang_up(session_id.get()))
    }

    pub fn hold(&self, session_id: SessionId) -> BridgeResult<()> {
        forward!(self, "hold", self.engine.hold(session_id.get()))
    }

    pub fn un_hold(&self, session_id: SessionId) -> BridgeResult<()> {
        forward!(self, "unHold", self.engine.un_hold(session_id.get()))
    }

    pub fn mute_session(
        &self,
        session_id: SessionId,
        mute_incoming_audio: bool,
        mute_outgoing_audio: bool,
        mute_incoming_video: bool,
        mute_outgoing_video: bool,
    ) -> BridgeResult<()> {
        forward!(
            self,
            "muteSession",
            self.engine.mute_session(
                session_id.get(),
                mute_incoming_audio,
                mute_outgoing_audio,
                mute_incoming_video,
                mute_outgoing_video,
            )
        )
    }

    pub fn set_speaker(&self, enable: bool) -> BridgeResult<()> {
        forward!(self, "setLoudspeakerStatus", self.engine.set_loudspeaker_status(enable))
    }

    pub fn send_dtmf(
        &self,
        session_id: SessionId,
        method: DtmfMethod,
        code: u8,
        duration_ms: u32,
        play_tone: bool,
    ) -> BridgeResult<()> {
        forward!(
            self,
            "sendDtmf",
            self.engine.send_dtmf(session_id.get(), method, code, duration_ms, play_tone)
        )
    }

    pub fn set_audio_codecs(&self, codecs: &[AudioCodec]) -> BridgeResult<()> {
        forward!(self, "setAudioCodecs", self.engine.set_audio_codecs(codecs))
    }

    pub fn set_srtp_policy(&self, policy: SrtpPolicy) -> BridgeResult<()> {
        forward!(self, "setSrtpPolicy", self.engine.set_srtp_policy(policy))
    }

    pub fn enable_3gpp_tags(&self, enable: bool) -> BridgeResult<()> {
        forward!(self, "enable3GppTags", self.engine.enable_3gpp_tags(enable))
    }

    pub fn enable_cng(&self, enable: bool) -> BridgeResult<()> {
        forward!(self, "enableCNG", self.engine.enable_cng(enable))
    }

    pub fn enable_vad(&self, enable: bool) -> BridgeResult<()> {
        forward!(self, "enableVAD", self.engine.enable_vad(enable))
    }

    /// The iOS engine runs echo cancellation inside the system audio unit and exposes no
    /// toggle; there this is a successful no-op.
    pub fn enable_aec(&self, enable: bool) -> BridgeResult<()> {
        if !self.has_audio_processing_toggles() {
            tracing::debug!("enableAEC({}) skipped on {:?}", enable, self.platform());
            return Ok(());
        }
        forward!(self, "enableAEC", self.engine.enable_aec(enable))
    }

    pub fn enable_agc(&self, enable: bool) -> BridgeResult<()> {
        if !self.has_audio_processing_toggles() {
            tracing::debug!("enableAGC({}) skipped on {:?}", enable, self.platform());
            return Ok(());
        }
        forward!(self, "enableAGC", self.engine.enable_agc(enable))
    }

    pub fn enable_ans(&self, enable: bool) -> BridgeResult<()> {
        if !self.has_audio_processing_toggles() {
            tracing::debug!("enableANS({}) skipped on {:?}", enable, self.platform());
            return Ok(());
        }
        forward!(self, "enableANS", self.engine.enable_ans(enable))
    }

    pub fn enable_audio_manager(&self, enable: bool) -> BridgeResult<()> {
        forward!(self, "enableAudioManager", self.engine.enable_audio_manager(enable))
    }

    fn has_audio_processing_toggles(&self) -> bool {
        self.engine.platform() == Platform::Android
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineCall, MockEngine};

    #[test]
    fn test_codes_pass_through() {
        let engine = Arc::new(MockEngine::new());
        let control = CallControl::new(engine.clone());
        let id = SessionId::new(500).unwrap();

        assert!(control.hold(id).is_ok());

        engine.fail_next("hold", -60098);
        let err = control.hold(id).unwrap_err();
        assert!(matches!(err, BridgeError::Sdk { operation: "hold", code: -60098 }));
        assert_eq!(err.result_code(), -60098);
    }

    #[test]
    fn test_make_call_returns_engine_session_id() {
        let engine = Arc::new(MockEngine::new().with_next_session(500));
        let control = CallControl::new(engine.clone());

        let id = control.make_call("1002", true, false).unwrap();
        assert_eq!(id.get(), 500);
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Call { callee: "1002".into(), send_sdp: true, video: false }]
        );

        engine.fail_next("call", -60001);
        assert!(matches!(
            control.make_call("1003", true, false),
            Err(BridgeError::Sdk { operation: "makeCall", code: -60001 })
        ));
    }

    #[test]
    fn test_audio_processing_shim() {
        let ios = Arc::new(MockEngine::new().with_platform(Platform::Ios));
        let control = CallControl::new(ios.clone());
        ios.fail_next("enableAEC", -1);
        assert!(control.enable_aec(true).is_ok());
        assert!(control.enable_agc(true).is_ok());
        assert!(control.enable_ans(false).is_ok());
        assert!(ios.calls().is_empty());

        let android = Arc::new(MockEngine::new().with_platform(Platform::Android));
        let control = CallControl::new(android.clone());
        assert!(control.enable_aec(true).is_ok());
        assert_eq!(android.calls(), vec![EngineCall::EnableAec(true)]);
    }

    #[test]
    fn test_serialize_is_reentrant() {
        let engine = Arc::new(MockEngine::new());
        let control = CallControl::new(engine);
        let id = SessionId::new(1).unwrap();
        let result = control.serialize(|| control.serialize(|| control.hang_up(id)));
        assert!(result.is_ok());
    }
}
