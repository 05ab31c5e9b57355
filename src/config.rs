//! Client configuration

use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::{LocalCache, MemoryStorage};

/// Default Adapty API URL
pub const DEFAULT_BASE_URL: &str = "https://api.adapty.io/api/v1";

/// Default interval between live-session heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Default per-request timeout for backend calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration options for the Adapty client
#[derive(Clone)]
pub struct AdaptyOptions {
    /// Adapty server URL (default: "https://api.adapty.io/api/v1")
    pub base_url: String,
    /// Local cache (default: MemoryStorage)
    pub storage: Arc<dyn LocalCache>,
    /// Interval between live-session heartbeats
    pub heartbeat_interval: Duration,
    /// Deadline for a single backend request
    pub request_timeout: Duration,
    /// Host application version, sent with installation syncs
    pub app_version: Option<String>,
    /// Host application build number
    pub app_build: Option<String>,
    /// Advertising identifier, attached to profile payloads when present
    pub advertising_id: Option<String>,
    /// Vendor-scoped device identifier
    pub device_identifier: Option<String>,
}

impl Default for AdaptyOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            storage: Arc::new(MemoryStorage::new()),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            app_version: None,
            app_build: None,
            advertising_id: None,
            device_identifier: None,
        }
    }
}

impl AdaptyOptions {
    /// Build options from the environment (and a `.env` file when present).
    ///
    /// Reads `ADAPTY_BASE_URL`, `ADAPTY_HEARTBEAT_SECS` and
    /// `ADAPTY_REQUEST_TIMEOUT_SECS`; anything missing or unparsable keeps its default.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let secs = |key: &str| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
        };

        Self {
            base_url: lookup("ADAPTY_BASE_URL").unwrap_or(defaults.base_url.clone()),
            heartbeat_interval: secs("ADAPTY_HEARTBEAT_SECS").unwrap_or(defaults.heartbeat_interval),
            request_timeout: secs("ADAPTY_REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout),
            ..defaults
        }
    }

    /// Base URL without a trailing slash.
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}

impl std::fmt::Debug for AdaptyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptyOptions")
            .field("base_url", &self.base_url)
            .field("storage", &"<storage>")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("request_timeout", &self.request_timeout)
            .field("app_version", &self.app_version)
            .field("app_build", &self.app_build)
            .field("advertising_id", &self.advertising_id)
            .field("device_identifier", &self.device_identifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let options = AdaptyOptions::default();
        assert_eq!(options.base_url, DEFAULT_BASE_URL);
        assert_eq!(options.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(options.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_env_reads_overrides() {
        let vars = HashMap::from([
            ("ADAPTY_BASE_URL", "http://localhost:9000/api/v1"),
            ("ADAPTY_HEARTBEAT_SECS", "15"),
            ("ADAPTY_REQUEST_TIMEOUT_SECS", " 5 "),
        ]);
        let options = AdaptyOptions::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(options.base_url, "http://localhost:9000/api/v1");
        assert_eq!(options.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(options.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env_keeps_defaults_for_bad_values() {
        let vars = HashMap::from([
            ("ADAPTY_HEARTBEAT_SECS", "0"),
            ("ADAPTY_REQUEST_TIMEOUT_SECS", "soon"),
        ]);
        let options = AdaptyOptions::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(options.base_url, DEFAULT_BASE_URL);
        assert_eq!(options.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(options.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_from_env_without_overrides() {
        // Only asserts what no environment can change.
        let options = AdaptyOptions::from_env();
        assert!(options.heartbeat_interval > Duration::ZERO);
        assert!(options.request_timeout > Duration::ZERO);
    }

    #[test]
    fn test_normalized_base_url_strips_trailing_slash() {
        let options = AdaptyOptions {
            base_url: "http://localhost:8080/api/v1/".into(),
            ..Default::default()
        };
        assert_eq!(options.normalized_base_url(), "http://localhost:8080/api/v1");
    }
}
