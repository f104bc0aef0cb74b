//! Configuration Validation Tests
//!
//! Covers defaults, partial deserialization, boundary values and the
//! `NETPOLL_*` environment overrides.

use netpoll_core::config::{env_vars, SchedulerConfig, DEFAULT_MAX_WORKERS, DEFAULT_REFRESH_INTERVAL_SECS};
use netpoll_core::error::ConfigError;
use serde_json::json;
use std::time::Duration;

#[test]
fn test_defaults_are_valid() {
    let config = SchedulerConfig::default();
    assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
    assert_eq!(config.refresh_interval_secs, DEFAULT_REFRESH_INTERVAL_SECS);
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_object_uses_defaults() {
    let config: SchedulerConfig = serde_json::from_value(json!({})).unwrap();
    assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
    assert_eq!(config.refresh_interval(), Duration::from_secs(300));
    assert!(config.sysname_filter.is_none());
}

#[test]
fn test_handler_config_is_passed_through() {
    let config: SchedulerConfig = serde_json::from_value(json!({
        "max_workers": 2,
        "handler_config": { "vlan": { "skip_native": true } }
    }))
    .unwrap();
    assert_eq!(config.max_workers, 2);
    assert_eq!(config.handler_config["vlan"]["skip_native"], json!(true));
}

#[test]
fn test_boundary_values() {
    assert!(SchedulerConfig::new(1).validate().is_ok());

    let err = SchedulerConfig::new(4)
        .with_refresh_interval(Duration::from_millis(500))
        .validate()
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::InvalidValue {
            field: "refresh_interval_secs",
            message: "must be at least 1 second".to_string(),
        }
    );

    let err = SchedulerConfig::new(4).with_sysname_filter("  ").validate().unwrap_err();
    assert!(err.to_string().contains("sysname_filter"));
}

#[test]
fn test_env_overrides() {
    std::env::set_var(env_vars::MAX_WORKERS, "8");
    std::env::set_var(env_vars::REFRESH_INTERVAL_SECS, "not-a-number");
    std::env::set_var(env_vars::SYSNAME_FILTER, "%.uninett.no");

    let mut config = SchedulerConfig::default();
    config.apply_env_overrides();

    std::env::remove_var(env_vars::MAX_WORKERS);
    std::env::remove_var(env_vars::REFRESH_INTERVAL_SECS);
    std::env::remove_var(env_vars::SYSNAME_FILTER);

    assert_eq!(config.max_workers, 8);
    // Unparseable values leave the field alone
    assert_eq!(config.refresh_interval_secs, DEFAULT_REFRESH_INTERVAL_SECS);
    assert_eq!(config.sysname_filter.as_deref(), Some("%.uninett.no"));
}
