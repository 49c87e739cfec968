//! # SIPKit Call Bridge
//!
//! Binding layer between a precompiled vendor SIP/media engine and the operating system's
//! native call UI (CallKit on iOS, ConnectionService on Android).
//!
//! The crate owns no protocol logic. It:
//! - forwards call-control operations to the engine through a serialized facade,
//! - keeps the mapping between engine session ids and native-UI call tokens,
//! - reconciles engine call state with the OS call representation in both directions,
//! - publishes a small tagged event vocabulary to the application layer.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sipkit_call_bridge::{
//!     BridgeEvent, InitializeConfig, SipBridge,
//!     testing::{MockEngine, MockNativeUiFactory},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(MockEngine::new());
//! let bridge = SipBridge::new(engine.clone(), Arc::new(MockNativeUiFactory::new()));
//! let mut events = bridge.subscribe_raw();
//!
//! bridge.initialize(InitializeConfig::builder().local_sip_port(5060).build()?)?;
//! let session = bridge.make_call("1002", true, false)?;
//! bridge.hang_up(session)?;
//!
//! assert!(matches!(events.try_recv()?, BridgeEvent::InviteClosed { .. }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  application ──► SipBridge ──► CallControl ──► SipEngine (vendor)
//!       ▲              │               ▲               │
//!       │              ▼               │               ▼
//!  EventForwarder ◄─ NativeCallUiAdapter ◄── SdkEventTranslator
//!                      │   ▲
//!                      ▼   │
//!                  NativeCallUi (OS)
//! ```

pub mod adapter;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod native_ui;
pub mod registry;
pub mod sdk;
pub mod session;
pub mod testing;
pub mod types;

// Re-export main types
pub use adapter::NativeCallUiAdapter;
pub use bridge::SipBridge;
pub use channel::{MethodCall, MethodChannel, MethodError};
pub use config::{
    AudioCodec, DtmfMethod, InitializeConfig, LogLevel, NativeUiConfig, Platform, SipAccount,
    SrtpPolicy, TransportType,
};
pub use control::CallControl;
pub use error::{BridgeError, BridgeResult};
pub use events::{BridgeEvent, EventForwarder, EventStream};
pub use lifecycle::{LifecycleGuard, LifecycleState};
pub use native_ui::{ActionAck, ActionOutcome, EndReason, HostContext, NativeCallUi, NativeCallUiFactory};
pub use registry::SessionRegistry;
pub use sdk::{SdkEvent, SdkEventTranslator, SipEngine, VendorCallbacks};
pub use types::{CallDirection, CallLifecycleState, CallSession, PlatformToken, SessionId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
