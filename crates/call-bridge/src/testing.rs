//! In-memory test doubles
//!
//! [`MockEngine`] stands in for the vendor engine: it records every operation, hands out
//! session ids, returns scripted failure codes and can fire callbacks as the real engine
//! would. [`MockNativeUi`] and [`MockNativeUiFactory`] do the same for the OS call UI.
//!
//! No internal lock is held while a callback or hook runs, so hooks may call straight back
//! into the bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{AudioCodec, DtmfMethod, InitializeConfig, NativeUiConfig, Platform, SipAccount, SrtpPolicy};
use crate::native_ui::{
    ActionAck, ActionOutcome, EndReason, HostContext, NativeCallUi, NativeCallUiFactory, NativeUiError,
};
use crate::sdk::{InviteParties, MediaSummary, SipEngine, VendorCallbacks};
use crate::types::PlatformToken;

/// Operation recorded by [`MockEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Initialize { local_sip_port: u32 },
    Uninitialize,
    SetLicenseKey(String),
    SetUser(String),
    RegisterServer { timeout_secs: u32, retry_times: u32 },
    UnregisterServer,
    Call { callee: String, send_sdp: bool, video: bool },
    HangUp(i32),
    Hold(i32),
    UnHold(i32),
    Mute {
        session_id: i32,
        incoming_audio: bool,
        outgoing_audio: bool,
        incoming_video: bool,
        outgoing_video: bool,
    },
    SetLoudspeaker(bool),
    SendDtmf {
        session_id: i32,
        method: DtmfMethod,
        code: u8,
        duration_ms: u32,
        play_tone: bool,
    },
    SetAudioCodecs(Vec<AudioCodec>),
    SetSrtpPolicy(SrtpPolicy),
    Enable3GppTags(bool),
    EnableCng(bool),
    EnableVad(bool),
    EnableAec(bool),
    EnableAgc(bool),
    EnableAns(bool),
    EnableAudioManager(bool),
}

type SpeakerHook = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    failures: HashMap<String, i32>,
    next_session: i64,
}

/// Scriptable [`SipEngine`]
pub struct MockEngine {
    platform: Platform,
    state: Mutex<EngineState>,
    callbacks: Mutex<Option<Arc<dyn VendorCallbacks>>>,
    speaker_hook: Mutex<Option<SpeakerHook>>,
    close_on_hang_up: AtomicBool,
}

impl MockEngine {
    /// Android engine handing out session ids from 1
    pub fn new() -> Self {
        Self {
            platform: Platform::Android,
            state: Mutex::new(EngineState {
                next_session: 1,
                ..Default::default()
            }),
            callbacks: Mutex::new(None),
            speaker_hook: Mutex::new(None),
            close_on_hang_up: AtomicBool::new(false),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Session id returned by the next `call`; later calls count up from it
    pub fn with_next_session(self, session_id: i64) -> Self {
        self.state.lock().next_session = session_id;
        self
    }

    /// Deliver `on_invite_closed` synchronously from inside `hang_up`, like some engine builds do
    pub fn with_close_on_hang_up(self) -> Self {
        self.close_on_hang_up.store(true, Ordering::Relaxed);
        self
    }

    /// Make the next `operation` return `code`. Names follow the vendor API (`"hold"`, `"call"`, ...).
    pub fn fail_next(&self, operation: &str, code: i32) {
        self.state.lock().failures.insert(operation.to_string(), code);
    }

    /// Run `hook` after every `set_loudspeaker_status`
    pub fn on_set_loudspeaker(&self, hook: impl Fn(bool) + Send + Sync + 'static) {
        *self.speaker_hook.lock() = Some(Arc::new(hook));
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// How many recorded operations match `pred`
    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn callbacks(&self) -> Option<Arc<dyn VendorCallbacks>> {
        self.callbacks.lock().clone()
    }

    fn record(&self, operation: &str, call: EngineCall) -> i32 {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.failures.remove(operation).unwrap_or(0)
    }

    fn with_callbacks(&self, f: impl FnOnce(&dyn VendorCallbacks)) {
        let callbacks = self.callbacks();
        if let Some(callbacks) = callbacks {
            f(callbacks.as_ref());
        }
    }

    // ===== CALLBACK FIRING =====

    pub fn fire_trying(&self, session_id: i64) {
        self.with_callbacks(|cb| cb.on_invite_trying(session_id));
    }

    pub fn fire_ringing(&self, session_id: i64) {
        self.with_callbacks(|cb| cb.on_invite_ringing(session_id, "Ringing", 180, ""));
    }

    pub fn fire_answered(&self, session_id: i64) {
        let media = MediaSummary {
            audio_codecs: "PCMU".into(),
            exists_audio: true,
            ..Default::default()
        };
        self.with_callbacks(|cb| cb.on_invite_answered(session_id, &InviteParties::default(), &media, ""));
    }

    pub fn fire_connected(&self, session_id: i64) {
        self.with_callbacks(|cb| cb.on_invite_connected(session_id));
    }

    pub fn fire_closed(&self, session_id: i64) {
        self.with_callbacks(|cb| cb.on_invite_closed(session_id, ""));
    }

    pub fn fire_failure(&self, session_id: i64, reason: &str, code: i32) {
        self.with_callbacks(|cb| cb.on_invite_failure(session_id, &InviteParties::default(), reason, code, ""));
    }

    pub fn fire_remote_hold(&self, session_id: i64) {
        self.with_callbacks(|cb| cb.on_remote_hold(session_id));
    }

    pub fn fire_register_success(&self) {
        self.with_callbacks(|cb| cb.on_register_success("OK", 200, ""));
    }

    pub fn fire_incoming(&self, session_id: i64, caller: &str) {
        let parties = InviteParties {
            caller: caller.to_string(),
            ..Default::default()
        };
        self.with_callbacks(|cb| cb.on_invite_incoming(session_id, &parties, &MediaSummary::default(), ""));
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SipEngine for MockEngine {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn set_callbacks(&self, callbacks: Arc<dyn VendorCallbacks>) {
        *self.callbacks.lock() = Some(callbacks);
    }

    fn initialize(&self, config: &InitializeConfig) -> i32 {
        self.record(
            "initialize",
            EngineCall::Initialize {
                local_sip_port: config.local_sip_port,
            },
        )
    }

    fn uninitialize(&self) {
        self.record("uninitialize", EngineCall::Uninitialize);
    }

    fn set_license_key(&self, key: &str) -> i32 {
        self.record("setLicenseKey", EngineCall::SetLicenseKey(key.to_string()))
    }

    fn set_user(&self, account: &SipAccount) -> i32 {
        self.record("setUser", EngineCall::SetUser(account.user_name.clone()))
    }

    fn register_server(&self, timeout_secs: u32, retry_times: u32) -> i32 {
        self.record("registerServer", EngineCall::RegisterServer { timeout_secs, retry_times })
    }

    fn unregister_server(&self) -> i32 {
        self.record("unRegisterServer", EngineCall::UnregisterServer)
    }

    fn call(&self, callee: &str, send_sdp: bool, video_call: bool) -> i64 {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Call {
            callee: callee.to_string(),
            send_sdp,
            video: video_call,
        });
        if let Some(code) = state.failures.remove("call") {
            return i64::from(code);
        }
        let id = state.next_session;
        state.next_session += 1;
        id
    }

    fn hang_up(&self, session_id: i32) -> i32 {
        let code = self.record("hangUp", EngineCall::HangUp(session_id));
        if code == 0 && self.close_on_hang_up.load(Ordering::Relaxed) {
            self.fire_closed(i64::from(session_id));
        }
        code
    }

    fn hold(&self, session_id: i32) -> i32 {
        self.record("hold", EngineCall::Hold(session_id))
    }

    fn un_hold(&self, session_id: i32) -> i32 {
        self.record("unHold", EngineCall::UnHold(session_id))
    }

    fn mute_session(
        &self,
        session_id: i32,
        mute_incoming_audio: bool,
        mute_outgoing_audio: bool,
        mute_incoming_video: bool,
        mute_outgoing_video: bool,
    ) -> i32 {
        self.record(
            "muteSession",
            EngineCall::Mute {
                session_id,
                incoming_audio: mute_incoming_audio,
                outgoing_audio: mute_outgoing_audio,
                incoming_video: mute_incoming_video,
                outgoing_video: mute_outgoing_video,
            },
        )
    }

    fn set_loudspeaker_status(&self, enable: bool) -> i32 {
        let code = self.record("setLoudspeakerStatus", EngineCall::SetLoudspeaker(enable));
        let hook = self.speaker_hook.lock().clone();
        if let Some(hook) = hook {
            hook(enable);
        }
        code
    }

    fn send_dtmf(&self, session_id: i32, method: DtmfMethod, code: u8, duration_ms: u32, play_tone: bool) -> i32 {
        self.record(
            "sendDtmf",
            EngineCall::SendDtmf {
                session_id,
                method,
                code,
                duration_ms,
                play_tone,
            },
        )
    }

    fn set_audio_codecs(&self, codecs: &[AudioCodec]) -> i32 {
        self.record("setAudioCodecs", EngineCall::SetAudioCodecs(codecs.to_vec()))
    }

    fn set_srtp_policy(&self, policy: SrtpPolicy) -> i32 {
        self.record("setSrtpPolicy", EngineCall::SetSrtpPolicy(policy))
    }

    fn enable_3gpp_tags(&self, enable: bool) -> i32 {
        self.record("enable3GppTags", EngineCall::Enable3GppTags(enable))
    }

    fn enable_cng(&self, enable: bool) -> i32 {
        self.record("enableCNG", EngineCall::EnableCng(enable))
    }

    fn enable_vad(&self, enable: bool) -> i32 {
        self.record("enableVAD", EngineCall::EnableVad(enable))
    }

    fn enable_aec(&self, enable: bool) -> i32 {
        self.record("enableAEC", EngineCall::EnableAec(enable))
    }

    fn enable_agc(&self, enable: bool) -> i32 {
        self.record("enableAGC", EngineCall::EnableAgc(enable))
    }

    fn enable_ans(&self, enable: bool) -> i32 {
        self.record("enableANS", EngineCall::EnableAns(enable))
    }

    fn enable_audio_manager(&self, enable: bool) -> i32 {
        self.record("enableAudioManager", EngineCall::EnableAudioManager(enable))
    }
}

/// Report recorded by [`MockNativeUi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiReport {
    OutgoingCall {
        token: PlatformToken,
        handle: String,
        has_video: bool,
    },
    StartedConnecting(PlatformToken),
    Connected(PlatformToken),
    Ended {
        token: PlatformToken,
        reason: EndReason,
    },
    Held {
        token: PlatformToken,
        on_hold: bool,
    },
    Muted {
        token: PlatformToken,
        muted: bool,
    },
    Dtmf {
        token: PlatformToken,
        digits: String,
    },
    Invalidated,
}

/// Recording [`NativeCallUi`]
#[derive(Default)]
pub struct MockNativeUi {
    reports: Mutex<Vec<UiReport>>,
    failures: Mutex<HashMap<String, String>>,
    config: Option<NativeUiConfig>,
    had_host: bool,
}

impl MockNativeUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `operation` fail with `reason`. Names: `"reportOutgoingCall"`,
    /// `"reportStartedConnecting"`, `"reportConnected"`, `"reportEnded"`, `"reportHeld"`,
    /// `"reportMuted"`, `"reportDtmf"`.
    pub fn fail_next(&self, operation: &str, reason: &str) {
        self.failures.lock().insert(operation.to_string(), reason.to_string());
    }

    pub fn reports(&self) -> Vec<UiReport> {
        self.reports.lock().clone()
    }

    /// Token of the most recent outgoing call announcement
    pub fn last_outgoing_token(&self) -> Option<PlatformToken> {
        self.reports.lock().iter().rev().find_map(|r| match r {
            UiReport::OutgoingCall { token, .. } => Some(*token),
            _ => None,
        })
    }

    pub fn is_invalidated(&self) -> bool {
        self.reports.lock().contains(&UiReport::Invalidated)
    }

    pub fn config(&self) -> Option<&NativeUiConfig> {
        self.config.as_ref()
    }

    /// Whether a live host context was handed over at creation
    pub fn had_host(&self) -> bool {
        self.had_host
    }

    fn record(&self, operation: &str, report: UiReport) -> Result<(), NativeUiError> {
        self.reports.lock().push(report);
        match self.failures.lock().remove(operation) {
            Some(reason) => Err(NativeUiError::new(reason)),
            None => Ok(()),
        }
    }
}

impl NativeCallUi for MockNativeUi {
    fn report_outgoing_call(&self, token: PlatformToken, handle: &str, has_video: bool) -> Result<(), NativeUiError> {
        self.record(
            "reportOutgoingCall",
            UiReport::OutgoingCall {
                token,
                handle: handle.to_string(),
                has_video,
            },
        )
    }

    fn report_started_connecting(&self, token: PlatformToken) -> Result<(), NativeUiError> {
        self.record("reportStartedConnecting", UiReport::StartedConnecting(token))
    }

    fn report_connected(&self, token: PlatformToken) -> Result<(), NativeUiError> {
        self.record("reportConnected", UiReport::Connected(token))
    }

    fn report_ended(&self, token: PlatformToken, reason: EndReason) -> Result<(), NativeUiError> {
        self.record("reportEnded", UiReport::Ended { token, reason })
    }

    fn report_held(&self, token: PlatformToken, on_hold: bool) -> Result<(), NativeUiError> {
        self.record("reportHeld", UiReport::Held { token, on_hold })
    }

    fn report_muted(&self, token: PlatformToken, muted: bool) -> Result<(), NativeUiError> {
        self.record("reportMuted", UiReport::Muted { token, muted })
    }

    fn report_dtmf(&self, token: PlatformToken, digits: &str) -> Result<(), NativeUiError> {
        self.record(
            "reportDtmf",
            UiReport::Dtmf {
                token,
                digits: digits.to_string(),
            },
        )
    }

    fn invalidate(&self) {
        self.reports.lock().push(UiReport::Invalidated);
    }
}

/// Factory handing out [`MockNativeUi`]s and keeping every one it created
#[derive(Default)]
pub struct MockNativeUiFactory {
    created: Mutex<Vec<Arc<MockNativeUi>>>,
    create_failure: Mutex<Option<String>>,
    requires_host: bool,
}

impl MockNativeUiFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse creation without a live host, like ConnectionService does
    pub fn requiring_host() -> Self {
        Self {
            requires_host: true,
            ..Default::default()
        }
    }

    pub fn fail_next_create(&self, reason: &str) {
        *self.create_failure.lock() = Some(reason.to_string());
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recently created provider
    pub fn last(&self) -> Option<Arc<MockNativeUi>> {
        self.created.lock().last().cloned()
    }
}

impl NativeCallUiFactory for MockNativeUiFactory {
    fn create(
        &self,
        config: &NativeUiConfig,
        host: Option<Arc<dyn HostContext>>,
    ) -> Result<Arc<dyn NativeCallUi>, NativeUiError> {
        if let Some(reason) = self.create_failure.lock().take() {
            return Err(NativeUiError::new(reason));
        }
        if self.requires_host && host.is_none() {
            return Err(NativeUiError::new("no host context attached"));
        }
        let ui = Arc::new(MockNativeUi {
            config: Some(config.clone()),
            had_host: host.is_some(),
            ..Default::default()
        });
        self.created.lock().push(ui.clone());
        Ok(ui)
    }
}

/// Host whose liveness can be flipped
#[derive(Debug)]
pub struct MockHost {
    alive: AtomicBool,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Relaxed);
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext for MockHost {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

/// Outcomes seen by an [`ActionAck`] from [`recorded_ack`]
#[derive(Debug, Clone, Default)]
pub struct AckLog(Arc<Mutex<Vec<ActionOutcome>>>);

impl AckLog {
    pub fn outcomes(&self) -> Vec<ActionOutcome> {
        self.0.lock().clone()
    }
}

/// An ack that records how it was completed
pub fn recorded_ack() -> (ActionAck, AckLog) {
    let log = AckLog::default();
    let sink = log.0.clone();
    (ActionAck::new(move |outcome| sink.lock().push(outcome)), log)
}
