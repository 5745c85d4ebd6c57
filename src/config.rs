//! Session identity and tuning parameters.
//!
//! Configuration is immutable once [`crate::session::Session::start`] is
//! called. The library itself never reads the environment or a config file —
//! that resolution is the embedding binary's job (see `resolve_from_env`,
//! used by the demo binary in `main.rs`).

use std::fmt;
use std::time::Duration;

use crate::queue::OverflowPolicy;

/// Identity and connection parameters for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub client_identifier: String,
    pub host_identifier: String,
    /// Empty disables monitor status reporting.
    pub monitor_identifier: String,
    pub last_connected_at: String,
    pub log_enabled: bool,
}

/// Tuning constants governing backoff, timeouts, and the outbound queue.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub connection_timeout: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_limit: u32,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub shutdown_grace: Duration,
    pub health_interval: Duration,
}

impl SessionTuning {
    /// 90% of `queue_capacity`, rounded down.
    #[must_use]
    pub fn queue_pressure_threshold(&self) -> usize {
        (self.queue_capacity * 9) / 10
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            retry_initial_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(15),
            retry_limit: 1000,
            queue_capacity: 15_000,
            overflow_policy: OverflowPolicy::DropOldest,
            shutdown_grace: Duration::from_secs(10),
            health_interval: Duration::from_secs(300),
        }
    }
}

/// Literal substring used to detect an application-level keepalive ping.
pub const PING_MATCH_SUBSTRING: &str = "\"operation\":\"ping\"";

/// Default value for `monitor_identifier` when the caller doesn't provide one.
pub const DEFAULT_MONITOR_IDENTIFIER: &str = "monitor";

#[derive(Debug)]
pub enum ConfigError {
    /// A required value was missing or empty.
    Missing(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "missing required configuration value: {field}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Resolves a [`SessionConfig`] from `WS_*` environment variables.
///
/// Used by the demo binary; the library proper never calls this, since
/// environment/config-file resolution is out of scope for the core crate.
///
/// # Errors
///
/// Returns [`ConfigError::Missing`] if `WS_URL` or `WS_IDENTIFIER` is unset or empty.
pub fn resolve_from_env() -> Result<SessionConfig, ConfigError> {
    let url = non_empty_env("WS_URL").ok_or(ConfigError::Missing("WS_URL"))?;
    let client_identifier =
        non_empty_env("WS_IDENTIFIER").ok_or(ConfigError::Missing("WS_IDENTIFIER"))?;
    let host_identifier = non_empty_env("WS_HOST_IDENTIFIER").unwrap_or_default();
    let monitor_identifier = std::env::var("WS_MONITOR_IDENTIFIER")
        .unwrap_or_else(|_| DEFAULT_MONITOR_IDENTIFIER.to_string());
    let log_enabled = std::env::var("WS_LOG")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Ok(SessionConfig {
        url,
        client_identifier,
        host_identifier,
        monitor_identifier,
        last_connected_at: String::new(),
        log_enabled,
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_threshold_is_ninety_percent() {
        let tuning = SessionTuning {
            queue_capacity: 100,
            ..SessionTuning::default()
        };
        assert_eq!(tuning.queue_pressure_threshold(), 90);
    }

    #[test]
    fn default_tuning_matches_spec_constants() {
        let t = SessionTuning::default();
        assert_eq!(t.connection_timeout, Duration::from_secs(30));
        assert_eq!(t.retry_initial_delay, Duration::from_secs(5));
        assert_eq!(t.retry_max_delay, Duration::from_secs(15));
        assert_eq!(t.retry_limit, 1000);
        assert_eq!(t.queue_capacity, 15_000);
        assert_eq!(t.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::Missing("WS_URL");
        assert_eq!(err.to_string(), "missing required configuration value: WS_URL");
    }
}
