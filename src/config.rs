//! Environment-driven configuration.
//!
//! A single [`Settings`] value is built once per process via [`Settings::from_env`]
//! and threaded into the components that need it. Unparsable values never panic;
//! they fall back to the documented default and log a warning, mirroring the
//! defensive-default behavior the admission controller uses for unknown source
//! databases.

use std::time::Duration;

pub const DEFAULT_WAIT_SECONDS: u64 = 30;
pub const MAX_WAIT_SECONDS: u64 = 300;
pub const PATTERN_MAX_ADJUSTMENT: f64 = 0.40;
pub const QUERY_TIMEOUT_SECONDS: u64 = 10;
pub const STORAGE_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_REGISTRY_TABLE: &str = "emr_connection_registry";
pub const DEFAULT_LIMITS_TABLE: &str = "emr_connection_limits";
pub const DEFAULT_TIMESERIES_ENDPOINT: &str = "http://localhost:9090";
pub const DEFAULT_PUSHGATEWAY_ENDPOINT: &str = "http://localhost:9091";

/// Which backend implementation a subsystem should use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    Real,
    Mock,
}

impl Provider {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "real" => Some(Provider::Real),
            "mock" => Some(Provider::Mock),
            _ => None,
        }
    }
}

/// Process-wide settings, resolved once from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
    pub pattern_recognition_enabled: bool,
    pub pattern_max_adjustment: f64,
    pub default_wait_seconds: u64,
    pub max_wait_seconds: u64,
    pub registry_table: String,
    pub limits_table: String,
    pub timeseries_endpoint: String,
    pub pushgateway_endpoint: String,
    pub provider: Provider,
    pub query_timeout: Duration,
    pub storage_timeout: Duration,
    pub health_exclude_pods_pattern: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pattern_recognition_enabled: true,
            pattern_max_adjustment: PATTERN_MAX_ADJUSTMENT,
            default_wait_seconds: DEFAULT_WAIT_SECONDS,
            max_wait_seconds: MAX_WAIT_SECONDS,
            registry_table: DEFAULT_REGISTRY_TABLE.to_string(),
            limits_table: DEFAULT_LIMITS_TABLE.to_string(),
            timeseries_endpoint: DEFAULT_TIMESERIES_ENDPOINT.to_string(),
            pushgateway_endpoint: DEFAULT_PUSHGATEWAY_ENDPOINT.to_string(),
            provider: Provider::Mock,
            query_timeout: Duration::from_secs(QUERY_TIMEOUT_SECONDS),
            storage_timeout: Duration::from_secs(STORAGE_TIMEOUT_SECONDS),
            health_exclude_pods_pattern: None,
        }
    }
}

impl Settings {
    /// Build settings from the process environment, falling back to defaults
    /// (with a logged warning) for any variable that is present but malformed.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();

        if let Ok(raw) = std::env::var("PATTERN_RECOGNITION") {
            settings.pattern_recognition_enabled = parse_bool(&raw, true);
        }
        if let Ok(raw) = std::env::var("PATTERN_MAX_ADJUSTMENT") {
            settings.pattern_max_adjustment = parse_non_negative_f64(
                "PATTERN_MAX_ADJUSTMENT",
                &raw,
                PATTERN_MAX_ADJUSTMENT,
            );
        }
        if let Ok(raw) = std::env::var("DEFAULT_WAIT_SECONDS") {
            settings.default_wait_seconds =
                parse_u64("DEFAULT_WAIT_SECONDS", &raw, DEFAULT_WAIT_SECONDS);
        }
        if let Ok(raw) = std::env::var("MAX_WAIT_SECONDS") {
            settings.max_wait_seconds = parse_u64("MAX_WAIT_SECONDS", &raw, MAX_WAIT_SECONDS);
        }
        if let Ok(raw) = std::env::var("REGISTRY_TABLE") {
            settings.registry_table = raw;
        }
        if let Ok(raw) = std::env::var("LIMITS_TABLE") {
            settings.limits_table = raw;
        }
        if let Ok(raw) = std::env::var("TIMESERIES_ENDPOINT") {
            settings.timeseries_endpoint = raw;
        }
        if let Ok(raw) = std::env::var("PUSHGATEWAY_ENDPOINT") {
            settings.pushgateway_endpoint = raw;
        }
        if let Ok(raw) = std::env::var("PROVIDER") {
            settings.provider = Provider::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unrecognized PROVIDER, defaulting to mock");
                Provider::Mock
            });
        }
        if let Ok(raw) = std::env::var("QUERY_TIMEOUT_SECONDS") {
            let secs = parse_u64("QUERY_TIMEOUT_SECONDS", &raw, QUERY_TIMEOUT_SECONDS);
            settings.query_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("STORAGE_TIMEOUT_SECONDS") {
            let secs = parse_u64("STORAGE_TIMEOUT_SECONDS", &raw, STORAGE_TIMEOUT_SECONDS);
            settings.storage_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("HEALTH_EXCLUDE_PODS_PATTERN") {
            settings.health_exclude_pods_pattern = Some(raw);
        }

        settings
    }
}

fn parse_bool(raw: &str, default: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            tracing::warn!(value = %raw, "unrecognized boolean, using default");
            default
        }
    }
}

fn parse_u64(name: &str, raw: &str, default: u64) -> u64 {
    raw.parse::<u64>().unwrap_or_else(|_| {
        tracing::warn!(name, value = %raw, "invalid integer, using default");
        default
    })
}

fn parse_non_negative_f64(name: &str, raw: &str, default: f64) -> f64 {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => v.abs(),
        _ => {
            tracing::warn!(name, value = %raw, "invalid float, using default");
            default
        }
    }
}
