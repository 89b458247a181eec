//! Call Controller configuration.
//!
//! Configuration is loaded from environment variables with defaults for
//! everything; only malformed values are rejected.

use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default bind address for signaling, meeting API, health and metrics.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default invitation window in seconds.
pub const DEFAULT_INVITATION_WINDOW_SECONDS: u64 = 40;

/// Default per-connection outbound event buffer.
pub const DEFAULT_CLIENT_CHANNEL_BUFFER: usize = 256;

/// Default lower bound of the RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 10000;

/// Default upper bound of the RTC port range.
pub const DEFAULT_RTC_MAX_PORT: u16 = 10100;

/// Default media listen IP.
pub const DEFAULT_LISTEN_IP: &str = "127.0.0.1";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "cc";

/// Media engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    /// IP the engine binds RTC sockets on.
    pub listen_ip: String,
    /// IP advertised in ICE candidates (defaults to `listen_ip`).
    pub announced_ip: Option<String>,
    /// Inclusive RTC port range.
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            listen_ip: DEFAULT_LISTEN_IP.to_string(),
            announced_ip: None,
            rtc_min_port: DEFAULT_RTC_MIN_PORT,
            rtc_max_port: DEFAULT_RTC_MAX_PORT,
        }
    }
}

impl MediaConfig {
    /// IP placed in ICE candidates.
    #[must_use]
    pub fn candidate_ip(&self) -> &str {
        self.announced_ip.as_deref().unwrap_or(&self.listen_ip)
    }
}

/// Call Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:3001").
    pub bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// How long an invitation rings before timing out (default: 40s).
    pub invitation_window: Duration,

    /// Outbound event buffer per client connection (default: 256).
    pub client_channel_buffer: usize,

    /// Media engine settings.
    pub media: MediaConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            instance_id: format!("{DEFAULT_INSTANCE_ID_PREFIX}-local"),
            invitation_window: Duration::from_secs(DEFAULT_INVITATION_WINDOW_SECONDS),
            client_channel_buffer: DEFAULT_CLIENT_CHANNEL_BUFFER,
            media: MediaConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("CC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let instance_id = vars.get("CC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let suffix: String = uuid::Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(8)
                .collect();
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{suffix}")
        });

        let invitation_window_seconds: u64 = parse_var(
            vars,
            "CC_INVITATION_WINDOW_SECONDS",
            DEFAULT_INVITATION_WINDOW_SECONDS,
        )?;

        let client_channel_buffer: usize = parse_var(
            vars,
            "CC_CLIENT_CHANNEL_BUFFER",
            DEFAULT_CLIENT_CHANNEL_BUFFER,
        )?;
        if client_channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_CLIENT_CHANNEL_BUFFER must be greater than zero".to_string(),
            ));
        }

        let rtc_min_port: u16 = parse_var(vars, "CC_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port: u16 = parse_var(vars, "CC_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "CC_RTC_MIN_PORT ({rtc_min_port}) exceeds CC_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let listen_ip = vars
            .get("CC_LISTEN_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_IP.to_string());

        let announced_ip = vars
            .get("CC_ANNOUNCED_IP")
            .filter(|ip| !ip.trim().is_empty())
            .cloned();

        Ok(Config {
            bind_address,
            instance_id,
            invitation_window: Duration::from_secs(invitation_window_seconds),
            client_channel_buffer,
            media: MediaConfig {
                listen_ip,
                announced_ip,
                rtc_min_port,
                rtc_max_port,
            },
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.instance_id.starts_with("cc-"));
        assert_eq!(config.invitation_window, Duration::from_secs(40));
        assert_eq!(config.client_channel_buffer, 256);
        assert_eq!(config.media, MediaConfig::default());
        assert_eq!(config.media.candidate_ip(), "127.0.0.1");
    }

    #[test]
    fn test_custom_values() {
        let vars = HashMap::from([
            ("CC_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            ("CC_INSTANCE_ID".to_string(), "cc-test-1".to_string()),
            ("CC_INVITATION_WINDOW_SECONDS".to_string(), "5".to_string()),
            ("CC_CLIENT_CHANNEL_BUFFER".to_string(), "8".to_string()),
            ("CC_RTC_MIN_PORT".to_string(), "20000".to_string()),
            ("CC_RTC_MAX_PORT".to_string(), "20010".to_string()),
            ("CC_LISTEN_IP".to_string(), "0.0.0.0".to_string()),
            ("CC_ANNOUNCED_IP".to_string(), "203.0.113.7".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("config should load");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.instance_id, "cc-test-1");
        assert_eq!(config.invitation_window, Duration::from_secs(5));
        assert_eq!(config.client_channel_buffer, 8);
        assert_eq!(config.media.rtc_min_port, 20000);
        assert_eq!(config.media.rtc_max_port, 20010);
        assert_eq!(config.media.candidate_ip(), "203.0.113.7");
    }

    #[test]
    fn test_invalid_window_rejected() {
        let vars = HashMap::from([(
            "CC_INVITATION_WINDOW_SECONDS".to_string(),
            "forty".to_string(),
        )]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("forty")));
    }

    #[test]
    fn test_inverted_port_range_rejected() {
        let vars = HashMap::from([
            ("CC_RTC_MIN_PORT".to_string(), "10100".to_string()),
            ("CC_RTC_MAX_PORT".to_string(), "10000".to_string()),
        ]);
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_zero_channel_buffer_rejected() {
        let vars = HashMap::from([("CC_CLIENT_CHANNEL_BUFFER".to_string(), "0".to_string())]);
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_blank_announced_ip_ignored() {
        let vars = HashMap::from([("CC_ANNOUNCED_IP".to_string(), "  ".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.media.announced_ip.is_none());
    }
}
