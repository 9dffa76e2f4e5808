use super::types::{LoggerConfig, StdoutConfig};

#[test]
fn test_default_stdout_config_is_compact() {
    let config = StdoutConfig::default();
    assert!(!config.json_format);
}

#[test]
fn test_with_base_name_sets_service_name() {
    let config = LoggerConfig::with_base_name("relforge");
    assert_eq!(config.service_name, "relforge");
    assert!(config.file_logging_config.is_none());
}
