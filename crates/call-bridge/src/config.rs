//! Configuration and input validation
//!
//! Every structure here is validated before any value reaches the engine, so malformed
//! accounts, out-of-range ports and bad hostnames surface as
//! [`BridgeError::Validation`](crate::error::BridgeError::Validation) on the calling thread.
//!
//! # Examples
//!
//! ```rust
//! use sipkit_call_bridge::config::{InitializeConfig, TransportType, SipAccount};
//!
//! let config = InitializeConfig::builder()
//!     .transport(TransportType::Tls)
//!     .local_sip_port(5061)
//!     .max_call_lines(4)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.local_sip_port, 5061);
//!
//! let account = SipAccount::new("1001", "secret", "pbx.example.com", 5060);
//! assert!(account.validate().is_ok());
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Upper bound for concurrent call lines; also bounds the registry's linear scans.
pub const MAX_CALL_LINES: u32 = 8;

/// SIP transport used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportType {
    Udp,
    Tls,
    Tcp,
    PersUdp,
    PersTcp,
}

impl TransportType {
    pub fn vendor_value(self) -> i32 {
        match self {
            Self::Udp => 0,
            Self::Tls => 1,
            Self::Tcp => 2,
            Self::PersUdp => 3,
            Self::PersTcp => 4,
        }
    }
}

/// Engine log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    None,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn vendor_value(self) -> i32 {
        match self {
            Self::None => -1,
            Self::Error => 1,
            Self::Warning => 2,
            Self::Info => 3,
            Self::Debug => 4,
        }
    }

    /// Matching `tracing` level, `None` when logging is off
    pub fn tracing_level(self) -> Option<tracing::Level> {
        match self {
            Self::None => None,
            Self::Error => Some(tracing::Level::ERROR),
            Self::Warning => Some(tracing::Level::WARN),
            Self::Info => Some(tracing::Level::INFO),
            Self::Debug => Some(tracing::Level::DEBUG),
        }
    }
}

/// SRTP negotiation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SrtpPolicy {
    None,
    Force,
    Prefer,
}

impl SrtpPolicy {
    pub fn vendor_value(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Force => 1,
            Self::Prefer => 2,
        }
    }
}

/// How DTMF digits are carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DtmfMethod {
    Rfc2833,
    Info,
}

impl DtmfMethod {
    pub fn vendor_value(self) -> i32 {
        match self {
            Self::Rfc2833 => 0,
            Self::Info => 1,
        }
    }
}

/// Highest DTMF event code (`D`)
pub const MAX_DTMF_CODE: u8 = 15;

/// Shortest and longest tone the engine accepts, in milliseconds
pub const DTMF_DURATION_MS: std::ops::RangeInclusive<u32> = 50..=500;

/// Map a keypad character to its RFC 2833 event code
pub fn dtmf_code(digit: char) -> Option<u8> {
    match digit {
        '0'..='9' => digit.to_digit(10).and_then(|d| u8::try_from(d).ok()),
        '*' => Some(10),
        '#' => Some(11),
        'A'..='D' => Some(12 + (digit as u8 - b'A')),
        'a'..='d' => Some(12 + (digit as u8 - b'a')),
        _ => None,
    }
}

/// Audio codecs the engine can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioCodec {
    Pcmu,
    Gsm,
    Pcma,
    G722,
    G729,
    Ilbc,
    Amr,
    AmrWb,
    Speex,
    SpeexWb,
    IsacWb,
    IsacSwb,
    Opus,
    Dtmf,
}

impl AudioCodec {
    /// Payload value handed to the engine.
    ///
    /// `Dtmf` and `IsacSwb` are kept on separate values; see DESIGN.md before changing either.
    pub fn vendor_value(self) -> i32 {
        match self {
            Self::Pcmu => 0,
            Self::Gsm => 3,
            Self::Pcma => 8,
            Self::G722 => 9,
            Self::G729 => 18,
            Self::Ilbc => 97,
            Self::Amr => 98,
            Self::AmrWb => 99,
            Self::Speex => 100,
            Self::Dtmf => 101,
            Self::SpeexWb => 102,
            Self::IsacWb => 103,
            Self::IsacSwb => 104,
            Self::Opus => 105,
        }
    }
}

/// Validate a codec list: non-empty, no two entries resolving to the same engine value.
pub fn validate_codecs(codecs: &[AudioCodec]) -> BridgeResult<()> {
    if codecs.is_empty() {
        return Err(BridgeError::validation("audioCodecs", "list is empty"));
    }
    for (i, codec) in codecs.iter().enumerate() {
        if codecs[..i]
            .iter()
            .any(|c| c.vendor_value() == codec.vendor_value())
        {
            return Err(BridgeError::validation(
                "audioCodecs",
                format!("{:?} listed twice (engine value {})", codec, codec.vendor_value()),
            ));
        }
    }
    Ok(())
}

/// Host platform, which decides the native call UI flavour and the audio-processing shim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    /// CallKit
    Ios,
    /// ConnectionService
    Android,
}

/// Parameters for engine initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeConfig {
    pub transport: TransportType,
    pub local_ip: String,
    pub local_sip_port: u32,
    pub log_level: LogLevel,
    pub log_file_path: Option<PathBuf>,
    pub max_call_lines: u32,
    pub sip_agent: String,
    pub audio_device_layer: i32,
    pub video_device_layer: i32,
    pub tls_cert_root_path: Option<PathBuf>,
    pub tls_cipher_list: String,
    pub verify_tls_cert: bool,
    pub dns_servers: Vec<String>,
    /// Packetization time in milliseconds
    pub ptime: u32,
    pub max_ptime: u32,
}

impl Default for InitializeConfig {
    fn default() -> Self {
        Self {
            transport: TransportType::Udp,
            local_ip: "0.0.0.0".to_string(),
            local_sip_port: 5060,
            log_level: LogLevel::None,
            log_file_path: None,
            max_call_lines: MAX_CALL_LINES,
            sip_agent: format!("SIPKit/{}", crate::VERSION),
            audio_device_layer: 0,
            video_device_layer: 0,
            tls_cert_root_path: None,
            tls_cipher_list: String::new(),
            verify_tls_cert: false,
            dns_servers: Vec::new(),
            ptime: 20,
            max_ptime: 60,
        }
    }
}

impl InitializeConfig {
    pub fn builder() -> InitializeConfigBuilder {
        InitializeConfigBuilder::new()
    }

    pub fn validate(&self) -> BridgeResult<()> {
        validate_port("localSipPort", self.local_sip_port)?;
        if self.local_ip.parse::<IpAddr>().is_err() {
            return Err(BridgeError::validation(
                "localIp",
                format!("'{}' is not an IP address", self.local_ip),
            ));
        }
        if self.max_call_lines == 0 || self.max_call_lines > MAX_CALL_LINES {
            return Err(BridgeError::validation(
                "maxCallLines",
                format!("must be between 1 and {}", MAX_CALL_LINES),
            ));
        }
        if !(0..=1).contains(&self.audio_device_layer) {
            return Err(BridgeError::validation("audioDeviceLayer", "must be 0 or 1"));
        }
        if !(0..=1).contains(&self.video_device_layer) {
            return Err(BridgeError::validation("videoDeviceLayer", "must be 0 or 1"));
        }
        for ptime in [self.ptime, self.max_ptime] {
            if !(10..=120).contains(&ptime) {
                return Err(BridgeError::validation("ptime", "must be between 10 and 120 ms"));
            }
        }
        if self.ptime > self.max_ptime {
            return Err(BridgeError::validation("ptime", "exceeds maxPtime"));
        }
        for server in &self.dns_servers {
            validate_host("dnsServers", server)?;
        }
        if self.transport == TransportType::Tls && self.verify_tls_cert && self.tls_cert_root_path.is_none() {
            return Err(BridgeError::validation(
                "tlsCertRootPath",
                "required when verifyTlsCert is set",
            ));
        }
        Ok(())
    }
}

/// Builder for [`InitializeConfig`]
#[derive(Debug, Clone, Default)]
pub struct InitializeConfigBuilder {
    config: InitializeConfig,
}

impl InitializeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: TransportType) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn local_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.local_ip = ip.into();
        self
    }

    pub fn local_sip_port(mut self, port: u32) -> Self {
        self.config.local_sip_port = port;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn log_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_file_path = Some(path.into());
        self
    }

    pub fn max_call_lines(mut self, lines: u32) -> Self {
        self.config.max_call_lines = lines;
        self
    }

    pub fn sip_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.sip_agent = agent.into();
        self
    }

    pub fn tls(mut self, cert_root: impl Into<PathBuf>, cipher_list: impl Into<String>, verify: bool) -> Self {
        self.config.tls_cert_root_path = Some(cert_root.into());
        self.config.tls_cipher_list = cipher_list.into();
        self.config.verify_tls_cert = verify;
        self
    }

    pub fn dns_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.dns_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn ptime(mut self, ptime: u32, max_ptime: u32) -> Self {
        self.config.ptime = ptime;
        self.config.max_ptime = max_ptime;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> BridgeResult<InitializeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// SIP account credentials and servers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SipAccount {
    pub user_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub auth_name: String,
    pub password: String,
    #[serde(default)]
    pub user_domain: String,
    pub sip_server: String,
    pub sip_server_port: u32,
    #[serde(default)]
    pub stun_server: String,
    #[serde(default)]
    pub stun_server_port: u32,
    #[serde(default)]
    pub outbound_server: String,
    #[serde(default)]
    pub outbound_server_port: u32,
}

impl SipAccount {
    pub fn new(
        user_name: impl Into<String>,
        password: impl Into<String>,
        sip_server: impl Into<String>,
        sip_server_port: u32,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            display_name: String::new(),
            auth_name: String::new(),
            password: password.into(),
            user_domain: String::new(),
            sip_server: sip_server.into(),
            sip_server_port,
            stun_server: String::new(),
            stun_server_port: 0,
            outbound_server: String::new(),
            outbound_server_port: 0,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.user_domain = domain.into();
        self
    }

    pub fn with_stun(mut self, server: impl Into<String>, port: u32) -> Self {
        self.stun_server = server.into();
        self.stun_server_port = port;
        self
    }

    pub fn with_outbound_proxy(mut self, server: impl Into<String>, port: u32) -> Self {
        self.outbound_server = server.into();
        self.outbound_server_port = port;
        self
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.user_name.trim().is_empty() {
            return Err(BridgeError::validation("userName", "must not be empty"));
        }
        if self.user_name.chars().any(char::is_whitespace) {
            return Err(BridgeError::validation("userName", "must not contain whitespace"));
        }
        validate_host("sipServer", &self.sip_server)?;
        validate_port("sipServerPort", self.sip_server_port)?;
        if !self.user_domain.is_empty() {
            validate_host("userDomain", &self.user_domain)?;
        }
        validate_optional_server("stunServer", &self.stun_server, self.stun_server_port)?;
        validate_optional_server("outboundServer", &self.outbound_server, self.outbound_server_port)?;
        Ok(())
    }
}

/// Native call UI settings (CallKit provider / ConnectionService phone account)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeUiConfig {
    pub app_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Icon resource name, platform specific
    #[serde(default)]
    pub icon: Option<String>,
}

fn default_true() -> bool {
    true
}

impl NativeUiConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            enabled: true,
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(BridgeError::validation("appName", "must not be empty"));
        }
        Ok(())
    }
}

/// Port must be 1..=65535
pub fn validate_port(field: &'static str, port: u32) -> BridgeResult<()> {
    if port == 0 || port > u32::from(u16::MAX) {
        return Err(BridgeError::validation(
            field,
            format!("{} is not between 1 and 65535", port),
        ));
    }
    Ok(())
}

/// Hostname or IP literal
pub fn validate_host(field: &'static str, host: &str) -> BridgeResult<()> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.is_empty() || host.len() > 253 {
        return Err(BridgeError::validation(field, "hostname length must be 1..=253"));
    }
    let name = host.strip_suffix('.').unwrap_or(host);
    for label in name.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(BridgeError::validation(
                field,
                format!("'{}' is not a valid hostname", host),
            ));
        }
    }
    Ok(())
}

fn validate_optional_server(field: &'static str, host: &str, port: u32) -> BridgeResult<()> {
    if host.is_empty() {
        if port != 0 {
            return Err(BridgeError::validation(field, "port given without a server"));
        }
        return Ok(());
    }
    validate_host(field, host)?;
    validate_port(field, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_initialize_config_is_valid() {
        let config = InitializeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_call_lines, MAX_CALL_LINES);
    }

    #[test]
    fn test_initialize_rejects_bad_values() {
        assert!(InitializeConfig::builder().local_sip_port(0).build().is_err());
        assert!(InitializeConfig::builder().local_sip_port(70000).build().is_err());
        assert!(InitializeConfig::builder().local_ip("not-an-ip").build().is_err());
        assert!(InitializeConfig::builder().max_call_lines(9).build().is_err());
        assert!(InitializeConfig::builder().ptime(60, 20).build().is_err());
        assert!(InitializeConfig::builder().dns_servers(["bad host"]).build().is_err());

        let err = InitializeConfig::builder()
            .transport(TransportType::Tls)
            .build()
            .map(|mut c| {
                c.verify_tls_cert = true;
                c
            })
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation { field: "tlsCertRootPath", .. }));
    }

    #[test]
    fn test_initialize_from_json() {
        let config: InitializeConfig = serde_json::from_value(serde_json::json!({
            "transport": "tcp",
            "localSipPort": 5080,
            "logLevel": "debug",
            "dnsServers": ["8.8.8.8"],
        }))
        .unwrap();
        assert_eq!(config.transport, TransportType::Tcp);
        assert_eq!(config.local_sip_port, 5080);
        assert_eq!(config.log_level.vendor_value(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_account_validation() {
        let account = SipAccount::new("1001", "pw", "pbx.example.com", 5060)
            .with_stun("stun.example.com", 3478)
            .with_outbound_proxy("10.0.0.1", 5060);
        assert!(account.validate().is_ok());

        let cases = [
            SipAccount::new("", "pw", "pbx.example.com", 5060),
            SipAccount::new("10 01", "pw", "pbx.example.com", 5060),
            SipAccount::new("1001", "pw", "-pbx.example.com", 5060),
            SipAccount::new("1001", "pw", "pbx..example.com", 5060),
            SipAccount::new("1001", "pw", "pbx.example.com", 0),
            SipAccount::new("1001", "pw", "pbx.example.com", 65536),
            SipAccount::new("1001", "pw", "pbx.example.com", 5060).with_stun("", 3478),
            SipAccount::new("1001", "pw", "pbx.example.com", 5060).with_stun("stun.example.com", 0),
        ];
        for account in &cases {
            assert!(account.validate().is_err(), "expected rejection: {:?}", account);
        }
    }

    #[test]
    fn test_hostname_rules() {
        assert!(validate_host("h", "example.com").is_ok());
        assert!(validate_host("h", "example.com.").is_ok());
        assert!(validate_host("h", "::1").is_ok());
        assert!(validate_host("h", &format!("{}.com", "a".repeat(63))).is_ok());
        assert!(validate_host("h", &format!("{}.com", "a".repeat(64))).is_err());
        assert!(validate_host("h", "exa_mple.com").is_err());
        assert!(validate_host("h", "").is_err());
    }

    #[test]
    fn test_codec_list_validation() {
        assert!(validate_codecs(&[AudioCodec::Opus, AudioCodec::Pcmu, AudioCodec::Dtmf]).is_ok());
        assert!(validate_codecs(&[AudioCodec::Dtmf, AudioCodec::IsacSwb]).is_ok());
        assert!(validate_codecs(&[AudioCodec::Pcma, AudioCodec::Pcma]).is_err());
        assert!(validate_codecs(&[]).is_err());
    }

    #[test]
    fn test_dtmf_codes() {
        assert_eq!(dtmf_code('0'), Some(0));
        assert_eq!(dtmf_code('9'), Some(9));
        assert_eq!(dtmf_code('*'), Some(10));
        assert_eq!(dtmf_code('#'), Some(11));
        assert_eq!(dtmf_code('D'), Some(MAX_DTMF_CODE));
        assert_eq!(dtmf_code('b'), Some(13));
        assert_eq!(dtmf_code('x'), None);
    }
}
