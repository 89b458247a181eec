//! Common configuration types for Group Call components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "call_controller=debug,tower_http=debug";

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log filter directive used when `RUST_LOG` is not set
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Read `CC_LOG_LEVEL` and `CC_LOG_JSON` from a variable map.
    ///
    /// Unparseable booleans fall back to plain-text logs.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_level = vars
            .get("CC_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let json_logs = vars
            .get("CC_LOG_JSON")
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        Self {
            log_level,
            json_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config, ObservabilityConfig::default());
        assert!(!config.json_logs);
    }

    #[test]
    fn test_json_logs_parsed() {
        let vars = HashMap::from([
            ("CC_LOG_JSON".to_string(), "true".to_string()),
            ("CC_LOG_LEVEL".to_string(), "info".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert!(config.json_logs);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_json_flag_falls_back() {
        let vars = HashMap::from([("CC_LOG_JSON".to_string(), "yes please".to_string())]);
        assert!(!ObservabilityConfig::from_vars(&vars).json_logs);
    }
}
