//! Native call UI adapter
//!
//! Reconciles engine sessions with the OS call representation in both directions.
//!
//! # Outbound (engine -> OS)
//!
//! [`report_outgoing_call`](NativeCallUiAdapter::report_outgoing_call) allocates a
//! [`PlatformToken`], records it in the [`SessionRegistry`] and announces the call. If the OS
//! refuses, the entry is rolled back, the engine session is hung up directly (not through this
//! adapter) and a single [`BridgeEvent::NativeUiFailure`] is published.
//!
//! The other `report_*` methods are best-effort: with native UI disabled, or for a session
//! without a token, they do nothing. OS failures are logged, never propagated.
//!
//! # Inbound (OS -> engine)
//!
//! [`handle_action`](NativeCallUiAdapter::handle_action) resolves the token, runs the facade
//! operation, completes the OS action and then publishes the matching `NativeUi*` event.
//! An unknown token fails the action and publishes nothing.
//!
//! # Audio route
//!
//! [`on_audio_route_changed`](NativeCallUiAdapter::on_audio_route_changed) compares against the
//! last applied or observed speaker state and ignores notifications raised while one is
//! already being handled. The application's own speaker changes go through
//! [`set_speaker`](NativeCallUiAdapter::set_speaker), which records the state first so the
//! OS echo of that change is not reported back. After [`shutdown`](NativeCallUiAdapter::shutdown)
//! route notifications are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{dtmf_code, DtmfMethod, NativeUiConfig};
use crate::control::CallControl;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventForwarder};
use crate::lifecycle::LifecycleState;
use crate::native_ui::{
    ActionAck, EndReason, HostContext, NativeAction, NativeCallUi, NativeCallUiFactory, NativeUiError,
};
use crate::registry::SessionRegistry;
use crate::session::CallTable;
use crate::types::{CallLifecycleState, PlatformToken, SessionId};

/// Duration of DTMF tones requested from the OS keypad
const NATIVE_DTMF_DURATION_MS: u32 = 160;

pub struct NativeCallUiAdapter {
    registry: SessionRegistry,
    calls: Arc<CallTable>,
    control: Arc<CallControl>,
    events: EventForwarder,
    factory: Arc<dyn NativeCallUiFactory>,
    provider: RwLock<Option<Arc<dyn NativeCallUi>>>,
    config: Mutex<Option<NativeUiConfig>>,
    host: RwLock<Option<Arc<dyn HostContext>>>,
    /// Last speaker state applied by the application or observed from the OS
    speaker: Mutex<Option<bool>>,
    in_route_change: AtomicBool,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for NativeCallUiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCallUiAdapter")
            .field("enabled", &self.is_enabled())
            .field("registry", &self.registry)
            .field("speaker", &*self.speaker.lock())
            .finish()
    }
}

/// Restores the route-change flag when handling finishes
struct RouteChangeGuard<'a> {
    flag: &'a AtomicBool,
    restore: bool,
}

impl Drop for RouteChangeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.restore, Ordering::Release);
    }
}

impl NativeCallUiAdapter {
    pub fn new(
        control: Arc<CallControl>,
        calls: Arc<CallTable>,
        events: EventForwarder,
        factory: Arc<dyn NativeCallUiFactory>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            calls,
            control,
            events,
            factory,
            provider: RwLock::new(None),
            config: Mutex::new(None),
            host: RwLock::new(None),
            speaker: Mutex::new(None),
            in_route_change: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.read().is_some()
    }

    pub fn config(&self) -> Option<NativeUiConfig> {
        self.config.lock().clone()
    }

    fn provider(&self) -> Option<Arc<dyn NativeCallUi>> {
        self.provider.read().clone()
    }

    // ===== HOST CONTEXT =====

    pub fn attach_host(&self, host: Arc<dyn HostContext>) {
        *self.host.write() = Some(host);
        tracing::debug!("Host context attached");
    }

    pub fn detach_host(&self) {
        if self.host.write().take().is_some() {
            tracing::debug!("Host context detached");
        }
    }

    fn live_host(&self) -> Option<Arc<dyn HostContext>> {
        self.host.read().clone().filter(|host| host.is_alive())
    }

    // ===== CONFIGURATION AND TOGGLE =====

    /// Store the configuration and apply its `enabled` flag.
    ///
    /// A running provider is rebuilt so the new name and icon take effect.
    pub fn configure(&self, config: NativeUiConfig) -> BridgeResult<()> {
        config.validate()?;
        let enabled = config.enabled;
        *self.config.lock() = Some(config);
        if enabled && self.is_enabled() {
            self.set_enabled(false)?;
        }
        self.set_enabled(enabled)
    }

    /// Switch native call UI integration on or off.
    ///
    /// Off: every tracked call is ended in the OS as failed and the registry is cleared; the
    /// engine sessions keep running. On: a fresh provider is created; calls placed before
    /// are not re-announced.
    pub fn set_enabled(&self, enabled: bool) -> BridgeResult<()> {
        if self.is_shut_down() {
            return Err(BridgeError::lifecycle("setNativeUiEnabled", LifecycleState::Disposed));
        }
        if enabled {
            self.enable()
        } else {
            self.disable();
            Ok(())
        }
    }

    fn enable(&self) -> BridgeResult<()> {
        if self.is_enabled() {
            return Ok(());
        }
        let config = self
            .config()
            .ok_or_else(|| BridgeError::config("native call UI has not been configured"))?;
        let provider = self
            .factory
            .create(&config, self.live_host())
            .map_err(|e| BridgeError::config(format!("native call UI unavailable: {}", e)))?;

        let mut slot = self.provider.write();
        if slot.is_some() {
            // Lost a race with another enable; keep the first provider
            provider.invalidate();
            return Ok(());
        }
        *slot = Some(provider);
        tracing::info!("Native call UI enabled for '{}'", config.app_name);
        Ok(())
    }

    fn disable(&self) {
        // Draining under the write lock keeps a concurrent outgoing report from registering a
        // token the outgoing provider never ends
        let (provider, drained) = {
            let mut slot = self.provider.write();
            let Some(provider) = slot.take() else {
                return;
            };
            (provider, self.registry.drain())
        };
        for (session_id, token) in drained {
            if let Err(e) = provider.report_ended(token, EndReason::Failed) {
                tracing::warn!("Could not end session {} in native call UI: {}", session_id, e);
            }
        }
        provider.invalidate();
        tracing::info!("Native call UI disabled");
    }

    /// Tear everything down; used on dispose
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.disable();
        self.registry.clear();
        self.detach_host();
        *self.speaker.lock() = None;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ===== OUTBOUND =====

    /// Announce a new outgoing call to the OS.
    ///
    /// No-op when disabled. On OS rejection the call is rolled back and terminated.
    pub fn report_outgoing_call(&self, session_id: SessionId, callee: &str, has_video: bool) -> BridgeResult<()> {
        // The provider stays read-locked until the token is registered and announced, so a
        // disable in between either drains this entry or happens after the announcement
        let rejected = {
            let slot = self.provider.read();
            let Some(provider) = slot.as_ref() else {
                return Ok(());
            };
            let token = PlatformToken::new();
            self.registry.put(session_id, token)?;

            match provider.report_outgoing_call(token, callee, has_video) {
                Ok(()) => {
                    tracing::debug!("Session {} shown in native call UI as {}", session_id, token);
                    return Ok(());
                }
                Err(e) => {
                    self.registry.remove(session_id);
                    e
                }
            }
        };

        // Rollback runs unlocked: the engine may deliver the close callback synchronously
        tracing::warn!("Native call UI rejected session {}: {}", session_id, rejected);
        self.calls.finish(session_id, CallLifecycleState::Failed);
        // Straight to the engine: going through report_call_ended would re-enter here
        if let Err(hangup) = self.control.hang_up(session_id) {
            tracing::warn!("Terminating session {} failed: {}", session_id, hangup);
        }
        self.events.emit(BridgeEvent::NativeUiFailure {
            session_id,
            reason: rejected.reason.clone(),
        });
        Err(BridgeError::NativeUiRegistration {
            session_id,
            reason: rejected.reason,
        })
    }

    pub fn report_outgoing_call_started_connecting(&self, session_id: SessionId) {
        self.report(session_id, "started connecting", |ui, token| {
            ui.report_started_connecting(token)
        });
    }

    pub fn report_call_connected(&self, session_id: SessionId) {
        self.report(session_id, "connected", |ui, token| ui.report_connected(token));
    }

    /// Report the end of a call; the registry entry goes away whatever the OS answers
    pub fn report_call_ended(&self, session_id: SessionId, reason: EndReason) {
        let Some(token) = self.registry.remove(session_id) else {
            return;
        };
        let Some(provider) = self.provider() else {
            return;
        };
        if let Err(e) = provider.report_ended(token, reason) {
            tracing::warn!("Native call UI ended report for session {} failed: {}", session_id, e);
        }
    }

    pub fn report_call_held(&self, session_id: SessionId, on_hold: bool) {
        self.report(session_id, "held", |ui, token| ui.report_held(token, on_hold));
    }

    pub fn report_call_muted(&self, session_id: SessionId, muted: bool) {
        self.report(session_id, "muted", |ui, token| ui.report_muted(token, muted));
    }

    pub fn report_dtmf(&self, session_id: SessionId, digits: &str) {
        self.report(session_id, "dtmf", |ui, token| ui.report_dtmf(token, digits));
    }

    fn report(
        &self,
        session_id: SessionId,
        what: &'static str,
        send: impl FnOnce(&dyn NativeCallUi, PlatformToken) -> Result<(), NativeUiError>,
    ) {
        let Some(provider) = self.provider() else {
            return;
        };
        let Some(token) = self.registry.token_for(session_id) else {
            tracing::debug!("Session {} has no native call UI token, skipping {}", session_id, what);
            return;
        };
        if let Err(e) = send(provider.as_ref(), token) {
            tracing::warn!("Native call UI {} report for session {} failed: {}", what, session_id, e);
        }
    }

    // ===== INBOUND =====

    /// Handle a user action from the OS call UI
    pub fn handle_action(&self, token: PlatformToken, action: NativeAction, ack: ActionAck) {
        let Some(session_id) = self.registry.session_for(&token) else {
            tracing::warn!("OS action {:?} for unknown call {}", action, token);
            ack.fail();
            return;
        };
        tracing::debug!("OS action {:?} for session {}", action, session_id);

        let outcome = self.control.serialize(|| self.apply_action(session_id, &action));
        match outcome {
            Ok(event) => {
                ack.fulfill();
                self.events.emit(event);
            }
            Err(e) => {
                tracing::warn!("OS action {:?} for session {} failed: {}", action, session_id, e);
                ack.fail();
                self.events.emit(BridgeEvent::NativeUiFailure {
                    session_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn apply_action(&self, session_id: SessionId, action: &NativeAction) -> BridgeResult<BridgeEvent> {
        match action {
            NativeAction::End => {
                // The OS call is gone either way, so local state is dropped even if the engine
                // refuses
                if let Err(e) = self.control.hang_up(session_id) {
                    tracing::warn!("Engine hang-up for session {} failed: {}", session_id, e);
                }
                self.registry.remove(session_id);
                self.calls.finish(session_id, CallLifecycleState::Ended);
                Ok(BridgeEvent::NativeUiEndCall { session_id })
            }
            NativeAction::SetHeld(on_hold) => {
                let on_hold = *on_hold;
                if on_hold {
                    self.control.hold(session_id)?;
                    self.calls.transition(session_id, CallLifecycleState::Held);
                } else {
                    self.control.un_hold(session_id)?;
                    self.calls.transition(session_id, CallLifecycleState::Connected);
                }
                Ok(BridgeEvent::NativeUiHold { session_id, on_hold })
            }
            NativeAction::SetMuted(muted) => {
                self.control.mute_session(session_id, false, *muted, false, false)?;
                Ok(BridgeEvent::NativeUiMute {
                    session_id,
                    muted: *muted,
                })
            }
            NativeAction::PlayDtmf(digits) => {
                let codes = digits
                    .chars()
                    .map(|c| dtmf_code(c).ok_or_else(|| BridgeError::validation("digits", format!("'{}' is not a DTMF digit", c))))
                    .collect::<BridgeResult<Vec<u8>>>()?;
                for code in codes {
                    self.control
                        .send_dtmf(session_id, DtmfMethod::Rfc2833, code, NATIVE_DTMF_DURATION_MS, true)?;
                }
                Ok(BridgeEvent::NativeUiDtmf {
                    session_id,
                    digits: digits.clone(),
                })
            }
        }
    }

    pub fn handle_end(&self, token: PlatformToken, ack: ActionAck) {
        self.handle_action(token, NativeAction::End, ack);
    }

    pub fn handle_set_held(&self, token: PlatformToken, on_hold: bool, ack: ActionAck) {
        self.handle_action(token, NativeAction::SetHeld(on_hold), ack);
    }

    pub fn handle_set_muted(&self, token: PlatformToken, muted: bool, ack: ActionAck) {
        self.handle_action(token, NativeAction::SetMuted(muted), ack);
    }

    pub fn handle_play_dtmf(&self, token: PlatformToken, digits: impl Into<String>, ack: ActionAck) {
        self.handle_action(token, NativeAction::PlayDtmf(digits.into()), ack);
    }

    // ===== AUDIO ROUTE =====

    /// Apply a speaker state requested by the application.
    ///
    /// The state is recorded before the engine call and route notifications are suppressed
    /// while it runs, so the OS echo of this change publishes nothing. On failure the previous
    /// state is restored.
    pub fn set_speaker(&self, enabled: bool) -> BridgeResult<()> {
        if self.is_shut_down() {
            return Err(BridgeError::lifecycle("setLoudspeakerStatus", LifecycleState::Disposed));
        }
        let raised = !self.in_route_change.swap(true, Ordering::AcqRel);
        let _guard = RouteChangeGuard {
            flag: &self.in_route_change,
            restore: !raised,
        };

        let previous = self.speaker.lock().replace(enabled);
        if let Err(e) = self.control.set_speaker(enabled) {
            *self.speaker.lock() = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn speaker_state(&self) -> Option<bool> {
        *self.speaker.lock()
    }

    /// OS reported an audio route change (e.g. the speaker button in the system call screen).
    ///
    /// Returns whether a `NativeUiSpeaker` event was published.
    pub fn on_audio_route_changed(&self, speaker_on: bool) -> bool {
        if self.is_shut_down() {
            tracing::debug!("Ignoring audio route change after shutdown (speaker={})", speaker_on);
            return false;
        }
        if self
            .in_route_change
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Ignoring nested audio route change (speaker={})", speaker_on);
            return false;
        }
        let _guard = RouteChangeGuard {
            flag: &self.in_route_change,
            restore: false,
        };

        {
            let mut last = self.speaker.lock();
            if *last == Some(speaker_on) {
                return false;
            }
            *last = Some(speaker_on);
        }

        // Keep the engine on the route the OS chose; this may raise a nested notification
        if let Err(e) = self.control.set_speaker(speaker_on) {
            tracing::warn!("Applying speaker={} to the engine failed: {}", speaker_on, e);
        }
        self.events.emit(BridgeEvent::NativeUiSpeaker { enabled: speaker_on });
        true
    }
}
