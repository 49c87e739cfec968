//! Application-facing API
//!
//! [`SipBridge`] is the single owned entry point: it validates input, enforces the
//! `uninitialized -> initialized -> disposed` lifecycle and wires the engine, the native call
//! UI adapter and the event forwarder together. Cloning is cheap and shares one bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::adapter::NativeCallUiAdapter;
use crate::config::{
    validate_codecs, AudioCodec, DtmfMethod, InitializeConfig, NativeUiConfig, SipAccount, SrtpPolicy,
    DTMF_DURATION_MS, MAX_DTMF_CODE,
};
use crate::control::CallControl;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventForwarder, EventStream};
use crate::lifecycle::{LifecycleGuard, LifecycleState};
use crate::native_ui::{EndReason, HostContext, NativeCallUiFactory};
use crate::sdk::{SdkEvent, SdkEventSink, SdkEventTranslator, SipEngine};
use crate::session::{CallTable, Transition};
use crate::types::{CallLifecycleState, CallSession, PlatformToken, SessionId};

/// Keypad characters indexed by DTMF event code
const DTMF_KEYS: &[u8; 16] = b"0123456789*#ABCD";

struct BridgeInner {
    lifecycle: LifecycleGuard,
    control: Arc<CallControl>,
    adapter: Arc<NativeCallUiAdapter>,
    calls: Arc<CallTable>,
    events: EventForwarder,
    account: Mutex<Option<SipAccount>>,
    /// Cleared on dispose; engine callbacks arriving later are dropped
    accepting_events: AtomicBool,
}

/// Handle to the call bridge
#[derive(Clone)]
pub struct SipBridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for SipBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipBridge")
            .field("state", &self.inner.lifecycle.state())
            .field("calls", &self.inner.calls.len())
            .field("native_ui", &self.inner.adapter)
            .finish()
    }
}

impl SipBridge {
    /// Wire a bridge around `engine`, installing its callback receiver
    pub fn new(engine: Arc<dyn SipEngine>, native_ui: Arc<dyn NativeCallUiFactory>) -> Self {
        let control = Arc::new(CallControl::new(engine.clone()));
        let calls = Arc::new(CallTable::new());
        let events = EventForwarder::default();
        let adapter = Arc::new(NativeCallUiAdapter::new(
            control.clone(),
            calls.clone(),
            events.clone(),
            native_ui,
        ));

        let inner = Arc::new(BridgeInner {
            lifecycle: LifecycleGuard::new(),
            control,
            adapter,
            calls,
            events,
            account: Mutex::new(None),
            accepting_events: AtomicBool::new(true),
        });

        let sink: Arc<dyn SdkEventSink> = inner.clone();
        engine.set_callbacks(Arc::new(SdkEventTranslator::new(Arc::downgrade(&sink))));

        tracing::debug!("Call bridge created for {:?}", engine.platform());
        Self { inner }
    }

    // ===== LIFECYCLE =====

    pub fn initialize(&self, config: InitializeConfig) -> BridgeResult<()> {
        let inner = &self.inner;
        inner.lifecycle.initialize_with(|| {
            config.validate()?;
            inner.control.initialize(&config)?;
            tracing::info!(
                "Engine initialized: {:?} on port {}, {} call lines",
                config.transport,
                config.local_sip_port,
                config.max_call_lines
            );
            Ok(())
        })
    }

    /// Tear the bridge down for good.
    ///
    /// Native call UI is switched off (ending its calls), tracked calls are forgotten and the
    /// engine is uninitialized if it ever was initialized.
    pub fn dispose(&self) -> BridgeResult<()> {
        let inner = &self.inner;
        inner.lifecycle.dispose_with(|from| {
            inner.accepting_events.store(false, Ordering::Release);
            inner.control.serialize(|| {
                inner.adapter.shutdown();
                inner.calls.clear();
                if from == LifecycleState::Initialized {
                    inner.control.uninitialize();
                }
            });
            *inner.account.lock() = None;
        })
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    // ===== ACCOUNT & REGISTRATION =====

    pub fn set_license_key(&self, key: &str) -> BridgeResult<()> {
        self.initialized("setLicenseKey", |inner| {
            if key.trim().is_empty() {
                return Err(BridgeError::validation("licenseKey", "must not be empty"));
            }
            inner.control.set_license_key(key)
        })
    }

    /// Validate and store the account, then hand it to the engine
    pub fn register(&self, account: SipAccount) -> BridgeResult<()> {
        self.initialized("register", |inner| {
            account.validate()?;
            inner.control.register(&account)?;
            tracing::info!("Account {}@{} set", account.user_name, account.sip_server);
            *inner.account.lock() = Some(account);
            Ok(())
        })
    }

    /// Start registration. The outcome arrives as `RegisterSuccess`/`RegisterFailure`.
    pub fn register_server(&self, timeout_secs: u32, retry_times: u32) -> BridgeResult<()> {
        self.initialized("registerServer", |inner| {
            if timeout_secs == 0 {
                return Err(BridgeError::validation("registerTimeout", "must be greater than 0"));
            }
            if inner.account.lock().is_none() {
                return Err(BridgeError::config("no account set, call register first"));
            }
            inner.control.register_server(timeout_secs, retry_times)
        })
    }

    pub fn unregister(&self) -> BridgeResult<()> {
        self.initialized("unRegister", |inner| inner.control.unregister())
    }

    pub fn account(&self) -> Option<SipAccount> {
        self.inner.account.lock().clone()
    }

    // ===== CALL CONTROL =====

    /// Place an outgoing call and report it to native call UI.
    ///
    /// If the OS refuses the call, the engine session is terminated, a `NativeUiFailure`
    /// event is published and [`BridgeError::NativeUiRegistration`] is returned.
    pub fn make_call(&self, callee: &str, send_sdp: bool, video_call: bool) -> BridgeResult<SessionId> {
        self.initialized("makeCall", |inner| {
            if callee.is_empty() || callee.chars().any(char::is_whitespace) {
                return Err(BridgeError::validation("callee", format!("'{}' is not dialable", callee)));
            }
            inner.control.serialize(|| {
                let session_id = inner.control.make_call(callee, send_sdp, video_call)?;
                inner.calls.insert(CallSession::outgoing(session_id, callee, video_call));
                inner.adapter.report_outgoing_call(session_id, callee, video_call)?;
                tracing::info!("Calling {} on session {}", callee, session_id);
                Ok(session_id)
            })
        })
    }

    /// Ask the engine to end a call.
    ///
    /// On success the session is forgotten, native call UI is told and `InviteClosed` is
    /// published; the engine's own close notification for it is then ignored.
    pub fn hang_up(&self, session_id: SessionId) -> BridgeResult<()> {
        self.initialized("hangUp", |inner| {
            let closed = inner.control.serialize(|| {
                // Taken out first so a close notification raised from inside the engine call
                // is treated as a duplicate
                let prior = inner.calls.state(session_id);
                let tracked = inner.calls.finish(session_id, CallLifecycleState::Ended);
                if let Err(e) = inner.control.hang_up(session_id) {
                    if let (Some(mut session), Some(state)) = (tracked, prior) {
                        session.state = state;
                        inner.calls.insert(session);
                    }
                    return Err(e);
                }
                inner.adapter.report_call_ended(session_id, EndReason::LocalEnded);
                Ok(tracked.is_some())
            })?;
            if closed {
                inner.events.emit(BridgeEvent::InviteClosed { session_id });
            }
            Ok(())
        })
    }

    pub fn hold(&self, session_id: SessionId) -> BridgeResult<()> {
        self.set_held(session_id, true)
    }

    pub fn un_hold(&self, session_id: SessionId) -> BridgeResult<()> {
        self.set_held(session_id, false)
    }

    fn set_held(&self, session_id: SessionId, on_hold: bool) -> BridgeResult<()> {
        let operation = if on_hold { "hold" } else { "unHold" };
        self.initialized(operation, |inner| {
            inner.control.serialize(|| {
                if on_hold {
                    inner.control.hold(session_id)?;
                    inner.calls.transition(session_id, CallLifecycleState::Held);
                } else {
                    inner.control.un_hold(session_id)?;
                    inner.calls.transition(session_id, CallLifecycleState::Connected);
                }
                inner.adapter.report_call_held(session_id, on_hold);
                Ok(())
            })
        })
    }

    pub fn mute_session(
        &self,
        session_id: SessionId,
        mute_incoming_audio: bool,
        mute_outgoing_audio: bool,
        mute_incoming_video: bool,
        mute_outgoing_video: bool,
    ) -> BridgeResult<()> {
        self.initialized("muteSession", |inner| {
            inner.control.serialize(|| {
                inner.control.mute_session(
                    session_id,
                    mute_incoming_audio,
                    mute_outgoing_audio,
                    mute_incoming_video,
                    mute_outgoing_video,
                )?;
                // The OS mute button reflects the microphone only
                inner.adapter.report_call_muted(session_id, mute_outgoing_audio);
                Ok(())
            })
        })
    }

    pub fn set_loudspeaker_status(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("setLoudspeakerStatus", |inner| inner.adapter.set_speaker(enable))
    }

    /// Send one DTMF digit (event code `0..=15`)
    pub fn send_dtmf(
        &self,
        session_id: SessionId,
        digit: u8,
        play_tone: bool,
        method: DtmfMethod,
        duration_ms: u32,
    ) -> BridgeResult<()> {
        self.initialized("sendDtmf", |inner| {
            if digit > MAX_DTMF_CODE {
                return Err(BridgeError::validation("digit", format!("{} is not between 0 and 15", digit)));
            }
            if !DTMF_DURATION_MS.contains(&duration_ms) {
                return Err(BridgeError::validation(
                    "durationMs",
                    format!("{} ms is not between 50 and 500", duration_ms),
                ));
            }
            inner.control.serialize(|| {
                inner.control.send_dtmf(session_id, method, digit, duration_ms, play_tone)?;
                let key = char::from(DTMF_KEYS[usize::from(digit)]);
                inner.adapter.report_dtmf(session_id, &key.to_string());
                Ok(())
            })
        })
    }

    // ===== NATIVE CALL UI =====

    pub fn configure_native_ui(&self, config: NativeUiConfig) -> BridgeResult<()> {
        self.live("configureNativeUi", |inner| {
            inner.control.serialize(|| inner.adapter.configure(config))
        })
    }

    pub fn set_native_ui_enabled(&self, enabled: bool) -> BridgeResult<()> {
        self.live("enableNativeUi", |inner| {
            inner
                .control
                .serialize(|| inner.adapter.set_enabled(enabled))
        })
    }

    pub fn is_native_ui_enabled(&self) -> bool {
        self.inner.adapter.is_enabled()
    }

    /// Hand over the host environment (activity / scene); kept until [`detach_host`](Self::detach_host)
    pub fn attach_host(&self, host: Arc<dyn HostContext>) -> BridgeResult<()> {
        self.live("attachHost", |inner| {
            inner.adapter.attach_host(host);
            Ok(())
        })
    }

    pub fn detach_host(&self) {
        self.inner.adapter.detach_host();
    }

    /// Adapter the platform glue routes OS actions and audio-route changes into
    pub fn native_ui(&self) -> Arc<NativeCallUiAdapter> {
        self.inner.adapter.clone()
    }

    /// Native call UI token of a session
    pub fn native_ui_token(&self, session_id: SessionId) -> BridgeResult<PlatformToken> {
        if !self.inner.adapter.is_enabled() {
            return Err(BridgeError::NativeUiDisabled);
        }
        self.inner
            .adapter
            .registry()
            .token_for(session_id)
            .ok_or(BridgeError::UnknownSession { session_id })
    }

    // ===== AUDIO & MEDIA SETTINGS =====

    pub fn set_audio_codecs(&self, codecs: &[AudioCodec]) -> BridgeResult<()> {
        self.initialized("setAudioCodecs", |inner| {
            validate_codecs(codecs)?;
            inner.control.set_audio_codecs(codecs)
        })
    }

    pub fn set_srtp_policy(&self, policy: SrtpPolicy) -> BridgeResult<()> {
        self.initialized("setSrtpPolicy", |inner| inner.control.set_srtp_policy(policy))
    }

    pub fn enable_3gpp_tags(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("set3GppTags", |inner| inner.control.enable_3gpp_tags(enable))
    }

    pub fn enable_cng(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("enableCNG", |inner| inner.control.enable_cng(enable))
    }

    pub fn enable_vad(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("enableVAD", |inner| inner.control.enable_vad(enable))
    }

    pub fn enable_aec(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("enableAEC", |inner| inner.control.enable_aec(enable))
    }

    pub fn enable_agc(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("enableAGC", |inner| inner.control.enable_agc(enable))
    }

    pub fn enable_ans(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("enableANS", |inner| inner.control.enable_ans(enable))
    }

    pub fn enable_audio_manager(&self, enable: bool) -> BridgeResult<()> {
        self.initialized("enableAudioManager", |inner| inner.control.enable_audio_manager(enable))
    }

    // ===== EVENTS & STATE =====

    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    pub fn subscribe_raw(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.events.subscribe_raw()
    }

    /// Calls placed through this bridge that have not ended yet
    pub fn active_sessions(&self) -> Vec<CallSession> {
        self.inner.calls.sessions()
    }

    pub fn session(&self, session_id: SessionId) -> BridgeResult<CallSession> {
        self.inner
            .calls
            .get(session_id)
            .ok_or(BridgeError::UnknownSession { session_id })
    }

    fn initialized<R>(&self, operation: &'static str, op: impl FnOnce(&BridgeInner) -> BridgeResult<R>) -> BridgeResult<R> {
        let inner = &self.inner;
        inner.lifecycle.with_initialized(operation, || op(inner))
    }

    fn live<R>(&self, operation: &'static str, op: impl FnOnce(&BridgeInner) -> BridgeResult<R>) -> BridgeResult<R> {
        let inner = &self.inner;
        inner.lifecycle.with_live(operation, || op(inner))
    }
}

impl SdkEventSink for BridgeInner {
    fn on_sdk_event(&self, event: SdkEvent) {
        self.control.serialize(|| {
            if !self.accepting_events.load(Ordering::Acquire) {
                tracing::debug!("Bridge disposed, dropping {:?}", event);
                return;
            }

            if let Some(session_id) = event.session_id() {
                if !self.calls.contains(session_id) {
                    tracing::debug!("Dropping {:?} for untracked session {}", event, session_id);
                    return;
                }
                self.reconcile(session_id, &event);
            }

            self.events.emit(BridgeEvent::from(event));
        });
    }
}

impl BridgeInner {
    /// Bring the call table and native call UI in line with an engine event
    fn reconcile(&self, session_id: SessionId, event: &SdkEvent) {
        match event {
            SdkEvent::InviteRinging { .. } => {
                if self.calls.transition(session_id, CallLifecycleState::Ringing).is_applied() {
                    self.adapter.report_outgoing_call_started_connecting(session_id);
                }
            }
            SdkEvent::InviteAnswered { .. } | SdkEvent::InviteConnected { .. } => {
                match self.calls.transition(session_id, CallLifecycleState::Connected) {
                    Transition::Applied(from) => {
                        // Answered without a ringing phase; the OS still expects both steps
                        if from == CallLifecycleState::Dialing {
                            self.adapter.report_outgoing_call_started_connecting(session_id);
                        }
                        self.adapter.report_call_connected(session_id);
                    }
                    Transition::Unchanged | Transition::Rejected(_) | Transition::Unknown => {}
                }
            }
            SdkEvent::InviteClosed { .. } => {
                self.calls.finish(session_id, CallLifecycleState::Ended);
                self.adapter.report_call_ended(session_id, EndReason::RemoteEnded);
            }
            SdkEvent::InviteFailure { reason, code, .. } => {
                tracing::info!("Session {} failed: {} ({})", session_id, reason, code);
                self.calls.finish(session_id, CallLifecycleState::Failed);
                self.adapter.report_call_ended(session_id, EndReason::Failed);
            }
            SdkEvent::InviteTrying { .. }
            | SdkEvent::RemoteHold { .. }
            | SdkEvent::RemoteUnHold { .. }
            | SdkEvent::RegisterSuccess { .. }
            | SdkEvent::RegisterFailure { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineCall, MockEngine, MockNativeUiFactory, UiReport};

    fn sid(raw: i64) -> SessionId {
        SessionId::new(raw).unwrap()
    }

    fn bridge() -> (Arc<MockEngine>, Arc<MockNativeUiFactory>, SipBridge) {
        let engine = Arc::new(MockEngine::new().with_next_session(500));
        let factory = Arc::new(MockNativeUiFactory::new());
        let bridge = SipBridge::new(engine.clone(), factory.clone());
        bridge.initialize(InitializeConfig::default()).unwrap();
        (engine, factory, bridge)
    }

    #[test]
    fn test_operations_need_initialize() {
        let engine = Arc::new(MockEngine::new());
        let bridge = SipBridge::new(engine.clone(), Arc::new(MockNativeUiFactory::new()));

        let err = bridge.make_call("1002", true, false).unwrap_err();
        assert!(matches!(err, BridgeError::Lifecycle { operation: "makeCall", state: LifecycleState::Uninitialized }));
        assert!(engine.calls().is_empty());

        // Native UI settings may come first
        assert!(bridge.configure_native_ui(NativeUiConfig::new("Demo")).is_ok());
        assert!(bridge.is_native_ui_enabled());
    }

    #[test]
    fn test_failed_initialize_keeps_bridge_uninitialized() {
        let engine = Arc::new(MockEngine::new());
        let bridge = SipBridge::new(engine.clone(), Arc::new(MockNativeUiFactory::new()));
        engine.fail_next("initialize", -60003);

        let err = bridge.initialize(InitializeConfig::default()).unwrap_err();
        assert_eq!(err.result_code(), -60003);
        assert_eq!(bridge.lifecycle_state(), LifecycleState::Uninitialized);
        assert!(bridge.initialize(InitializeConfig::default()).is_ok());
    }

    #[test]
    fn test_input_validation_happens_before_the_engine() {
        let (engine, _, bridge) = bridge();
        engine.clear_calls();

        assert!(matches!(bridge.make_call("", true, false), Err(BridgeError::Validation { field: "callee", .. })));
        assert!(matches!(bridge.make_call("10 02", true, false), Err(BridgeError::Validation { .. })));
        assert!(bridge.send_dtmf(sid(500), 16, true, DtmfMethod::Rfc2833, 160).is_err());
        assert!(bridge.send_dtmf(sid(500), 1, true, DtmfMethod::Rfc2833, 20).is_err());
        assert!(bridge.register_server(0, 3).is_err());
        assert!(bridge.set_audio_codecs(&[]).is_err());
        assert!(bridge.set_license_key(" ").is_err());
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_register_server_requires_account() {
        let (engine, _, bridge) = bridge();
        assert!(matches!(bridge.register_server(120, 3), Err(BridgeError::Config { .. })));

        bridge
            .register(SipAccount::new("1001", "pw", "pbx.example.com", 5060))
            .unwrap();
        bridge.register_server(120, 3).unwrap();
        assert_eq!(bridge.account().unwrap().user_name, "1001");
        assert!(engine.calls().contains(&EngineCall::RegisterServer { timeout_secs: 120, retry_times: 3 }));
    }

    #[test]
    fn test_failed_hang_up_keeps_tracking_the_call() {
        let (engine, _, bridge) = bridge();
        let id = bridge.make_call("1002", true, false).unwrap();
        engine.fail_next("hangUp", -60020);

        assert!(matches!(bridge.hang_up(id), Err(BridgeError::Sdk { code: -60020, .. })));
        assert_eq!(bridge.session(id).unwrap().state, CallLifecycleState::Dialing);
    }

    #[test]
    fn test_synchronous_close_during_hang_up_is_reported_once() {
        let engine = Arc::new(MockEngine::new().with_next_session(500).with_close_on_hang_up());
        let factory = Arc::new(MockNativeUiFactory::new());
        let bridge = SipBridge::new(engine.clone(), factory.clone());
        bridge.initialize(InitializeConfig::default()).unwrap();
        bridge.configure_native_ui(NativeUiConfig::new("Demo")).unwrap();
        let mut events = bridge.subscribe_raw();

        let id = bridge.make_call("1002", true, false).unwrap();
        bridge.hang_up(id).unwrap();

        assert_eq!(events.try_recv().unwrap(), BridgeEvent::InviteClosed { session_id: id });
        assert!(events.try_recv().is_err());

        let ui = factory.last().unwrap();
        let ended: Vec<_> = ui
            .reports()
            .into_iter()
            .filter(|r| matches!(r, UiReport::Ended { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
        assert!(matches!(ended[0], UiReport::Ended { reason: EndReason::LocalEnded, .. }));
    }

    #[test]
    fn test_answer_without_ringing_still_reports_connecting() {
        let (engine, factory, bridge) = bridge();
        bridge.configure_native_ui(NativeUiConfig::new("Demo")).unwrap();
        let id = bridge.make_call("1002", true, false).unwrap();
        engine.fire_answered(500);

        let ui = factory.last().unwrap();
        let token = bridge.native_ui_token(id).unwrap();
        let reports = ui.reports();
        assert_eq!(&reports[1..], &[UiReport::StartedConnecting(token), UiReport::Connected(token)]);
        assert_eq!(bridge.session(id).unwrap().state, CallLifecycleState::Connected);
    }

    #[test]
    fn test_events_for_unknown_sessions_are_dropped() {
        let (engine, _, bridge) = bridge();
        let mut events = bridge.subscribe_raw();

        engine.fire_ringing(77);
        engine.fire_incoming(78, "sip:2000@pbx");
        engine.fire_register_success();

        assert!(matches!(events.try_recv().unwrap(), BridgeEvent::RegisterSuccess { status_code: 200, .. }));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_native_ui_token_errors() {
        let (_, _, bridge) = bridge();
        assert!(matches!(bridge.native_ui_token(sid(500)), Err(BridgeError::NativeUiDisabled)));
        bridge.configure_native_ui(NativeUiConfig::new("Demo")).unwrap();
        assert!(matches!(bridge.native_ui_token(sid(500)), Err(BridgeError::UnknownSession { .. })));
    }

    #[test]
    fn test_dispose_tears_everything_down() {
        let (engine, factory, bridge) = bridge();
        bridge.configure_native_ui(NativeUiConfig::new("Demo")).unwrap();
        bridge.make_call("1002", true, false).unwrap();
        let mut events = bridge.subscribe_raw();

        bridge.dispose().unwrap();
        assert!(factory.last().unwrap().is_invalidated());
        assert!(bridge.active_sessions().is_empty());
        assert!(engine.calls().contains(&EngineCall::Uninitialize));

        engine.fire_closed(500);
        assert!(events.try_recv().is_err());
        assert!(bridge.set_native_ui_enabled(true).is_err());
        assert!(bridge.dispose().is_err());
    }
}
