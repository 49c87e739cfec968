//! Method-call surface
//!
//! The application framework talks to the bridge with a method name and a JSON argument
//! object. [`MethodChannel::invoke`] is async for the caller but runs the bridge call on the
//! blocking pool, since bridge operations block on the engine's serialization lock.
//!
//! Results follow the engine convention: `0` for success, the session id for `makeCall`, the
//! raw vendor code when the engine refuses. Caller mistakes (lifecycle, bad arguments,
//! unknown method) come back as [`MethodError`] instead of a code.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::bridge::SipBridge;
use crate::config::{AudioCodec, DtmfMethod, InitializeConfig, NativeUiConfig, SipAccount, SrtpPolicy};
use crate::error::{BridgeError, BridgeResult};
use crate::types::SessionId;

/// A method invocation from the application framework
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Error returned across the method channel
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct MethodError {
    pub code: String,
    pub message: String,
}

impl MethodError {
    pub const LIFECYCLE: &'static str = "LIFECYCLE";
    pub const INVALID_ARGUMENT: &'static str = "INVALID_ARGUMENT";
    pub const CONFIGURATION: &'static str = "CONFIGURATION";
    pub const NOT_IMPLEMENTED: &'static str = "NOT_IMPLEMENTED";
    pub const INTERNAL: &'static str = "INTERNAL";

    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
    session_id: SessionId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterServerArgs {
    timeout: u32,
    #[serde(default)]
    retries: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MakeCallArgs {
    callee: String,
    #[serde(default = "default_true")]
    send_sdp: bool,
    #[serde(default)]
    video_call: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MuteArgs {
    session_id: SessionId,
    #[serde(default)]
    mute_incoming_audio: bool,
    #[serde(default)]
    mute_outgoing_audio: bool,
    #[serde(default)]
    mute_incoming_video: bool,
    #[serde(default)]
    mute_outgoing_video: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DtmfArgs {
    session_id: SessionId,
    digit: u8,
    #[serde(default = "default_true")]
    play_tone: bool,
    #[serde(default = "default_dtmf_method")]
    method: DtmfMethod,
    #[serde(default = "default_dtmf_duration")]
    duration_ms: u32,
}

#[derive(Deserialize)]
struct EnableArgs {
    enable: bool,
}

#[derive(Deserialize)]
struct EnabledArgs {
    enabled: bool,
}

#[derive(Deserialize)]
struct LicenseArgs {
    key: String,
}

#[derive(Deserialize)]
struct CodecArgs {
    codecs: Vec<AudioCodec>,
}

#[derive(Deserialize)]
struct SrtpArgs {
    policy: SrtpPolicy,
}

fn default_true() -> bool {
    true
}

fn default_dtmf_method() -> DtmfMethod {
    DtmfMethod::Rfc2833
}

fn default_dtmf_duration() -> u32 {
    160
}

/// Dispatches [`MethodCall`]s onto a [`SipBridge`]
#[derive(Debug, Clone)]
pub struct MethodChannel {
    bridge: SipBridge,
}

impl MethodChannel {
    pub fn new(bridge: SipBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &SipBridge {
        &self.bridge
    }

    /// Run one method call
    pub async fn invoke(&self, call: MethodCall) -> Result<Value, MethodError> {
        let bridge = self.bridge.clone();
        let method = call.method.clone();
        tokio::task::spawn_blocking(move || dispatch(&bridge, &call))
            .await
            .map_err(|e| {
                tracing::error!("Method {} did not complete: {}", method, e);
                MethodError::new(MethodError::INTERNAL, e.to_string())
            })?
    }
}

fn dispatch(bridge: &SipBridge, call: &MethodCall) -> Result<Value, MethodError> {
    tracing::debug!("Method call: {}", call.method);
    match call.method.as_str() {
        "initialize" => code(bridge.initialize(args::<InitializeConfig>(call)?)),
        "register" => code(bridge.register(args::<SipAccount>(call)?)),
        "registerServer" => {
            let a: RegisterServerArgs = args(call)?;
            code(bridge.register_server(a.timeout, a.retries))
        }
        "unRegister" => code(bridge.unregister()),
        "makeCall" => {
            let a: MakeCallArgs = args(call)?;
            value(bridge.make_call(&a.callee, a.send_sdp, a.video_call).map(i64::from))
        }
        "hangUp" => code(bridge.hang_up(args::<SessionArgs>(call)?.session_id)),
        "hold" => code(bridge.hold(args::<SessionArgs>(call)?.session_id)),
        "unHold" => code(bridge.un_hold(args::<SessionArgs>(call)?.session_id)),
        "muteSession" => {
            let a: MuteArgs = args(call)?;
            code(bridge.mute_session(
                a.session_id,
                a.mute_incoming_audio,
                a.mute_outgoing_audio,
                a.mute_incoming_video,
                a.mute_outgoing_video,
            ))
        }
        "setLoudspeakerStatus" => code(bridge.set_loudspeaker_status(args::<EnableArgs>(call)?.enable)),
        "sendDtmf" => {
            let a: DtmfArgs = args(call)?;
            code(bridge.send_dtmf(a.session_id, a.digit, a.play_tone, a.method, a.duration_ms))
        }
        "configureCallKit" | "configureConnectionService" => {
            code(bridge.configure_native_ui(args::<NativeUiConfig>(call)?))
        }
        "enableCallKit" | "enableConnectionService" => {
            code(bridge.set_native_ui_enabled(args::<EnabledArgs>(call)?.enabled))
        }
        "setLicenseKey" => code(bridge.set_license_key(&args::<LicenseArgs>(call)?.key)),
        "setAudioCodecs" => code(bridge.set_audio_codecs(&args::<CodecArgs>(call)?.codecs)),
        "setSrtpPolicy" => code(bridge.set_srtp_policy(args::<SrtpArgs>(call)?.policy)),
        "set3GppTags" => code(bridge.enable_3gpp_tags(args::<EnableArgs>(call)?.enable)),
        "enableCNG" => code(bridge.enable_cng(args::<EnableArgs>(call)?.enable)),
        "enableVAD" => code(bridge.enable_vad(args::<EnableArgs>(call)?.enable)),
        "enableAEC" => code(bridge.enable_aec(args::<EnableArgs>(call)?.enable)),
        "enableAGC" => code(bridge.enable_agc(args::<EnableArgs>(call)?.enable)),
        "enableANS" => code(bridge.enable_ans(args::<EnableArgs>(call)?.enable)),
        "enableAudioManager" => code(bridge.enable_audio_manager(args::<EnableArgs>(call)?.enable)),
        "dispose" => code(bridge.dispose()),
        other => {
            tracing::warn!("Unknown method {}", other);
            Err(MethodError::new(
                MethodError::NOT_IMPLEMENTED,
                format!("{} is not a bridge method", other),
            ))
        }
    }
}

fn args<T: DeserializeOwned>(call: &MethodCall) -> Result<T, MethodError> {
    let arguments = match &call.arguments {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|e| reject(BridgeError::from(e)))
}

fn code(result: BridgeResult<()>) -> Result<Value, MethodError> {
    value(result.map(|()| 0))
}

fn value(result: BridgeResult<i64>) -> Result<Value, MethodError> {
    match result {
        Ok(v) => Ok(json!(v)),
        Err(e @ (BridgeError::Lifecycle { .. } | BridgeError::Validation { .. } | BridgeError::Serialization(_) | BridgeError::Config { .. })) => {
            Err(reject(e))
        }
        Err(e) => {
            tracing::debug!("Method failed with {}: {}", e.result_code(), e);
            Ok(json!(e.result_code()))
        }
    }
}

fn reject(error: BridgeError) -> MethodError {
    let code = match &error {
        BridgeError::Lifecycle { .. } => MethodError::LIFECYCLE,
        BridgeError::Validation { .. } | BridgeError::Serialization(_) => MethodError::INVALID_ARGUMENT,
        BridgeError::Config { .. } => MethodError::CONFIGURATION,
        _ => MethodError::INTERNAL,
    };
    MethodError::new(code, error.to_string())
}
