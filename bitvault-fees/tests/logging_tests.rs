use bitvault_fees::logging::{self, LogConfig, LogLevel};
use serde_json::json;
use std::sync::Once;

// Ensure logging is only initialized once across all tests
static INIT: Once = Once::new();

fn setup_logging() {
    INIT.call_once(|| {
        let config = LogConfig {
            level: LogLevel::Error,
            log_file: None,
            include_timestamps: false,
            include_source_location: false,
            json_format: false,
        };
        let _ = logging::init(&config);
    });
}

#[test]
fn test_repeated_initialization_is_not_an_error() {
    setup_logging();
    assert!(logging::init(&LogConfig::default()).is_ok());
    assert!(bitvault_fees::init().is_ok());

    logging::set_log_level(LogLevel::Debug);
    logging::set_log_level(LogLevel::Error);
}

#[test]
fn test_context_helpers_accept_params() {
    setup_logging();
    logging::log_sizing(LogLevel::Debug, "sized", Some(json!({ "vsize": 141 })));
    logging::log_selection(LogLevel::Info, "selected", None);
    logging::log_fees(LogLevel::Warn, "static fallback", Some(json!({ "errors": [] })));
    logging::log_breaker(LogLevel::Info, "state changed", None);
    logging::log_estimation(LogLevel::Debug, "phase complete", None);
}

#[test]
fn test_default_config() {
    let config = LogConfig::default();
    assert_eq!(config.level, LogLevel::Info);
    assert!(config.log_file.is_none());
    assert!(config.include_timestamps);
    assert!(!config.include_source_location);
    assert!(!config.json_format);
}

#[test]
fn test_config_from_toml() {
    let config: LogConfig = toml::from_str("level = \"warn\"\njson_format = true").unwrap();
    assert_eq!(config.level, LogLevel::Warn);
    assert!(config.json_format);
    assert!(config.include_timestamps);
}

#[test]
fn test_addresses_are_shortened() {
    let txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
    assert_eq!(logging::sanitize_for_logging(txid), "4a5e...a33b");

    let params = logging::sanitized_params(vec![("address", "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2")]);
    assert_eq!(params["address"], "1BvB...NVN2");
}
