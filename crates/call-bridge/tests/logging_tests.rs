//! Global subscriber installation; kept in its own test binary

use sipkit_call_bridge::logging::{setup_logging, LoggingConfig};
use sipkit_call_bridge::{BridgeError, LogLevel};

#[test]
fn test_setup_logging_installs_once() {
    let config = LoggingConfig::from(LogLevel::Debug).with_file_info();
    assert!(setup_logging(config.clone()).is_ok());
    tracing::debug!("logging is up");

    assert!(matches!(setup_logging(config), Err(BridgeError::Config { .. })));
}
