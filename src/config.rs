//! Session configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::{resolve_user_agent, TransportConfig, DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_SECS};

/// Default number of pages kept in history.
pub const DEFAULT_MAX_HISTORY: usize = 5;

/// Default retry count for transient transport failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default linear backoff unit in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// Default number of parallel download workers.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 10;

fn default_true() -> bool {
    true
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_download_workers() -> usize {
    DEFAULT_DOWNLOAD_WORKERS
}

/// Options fixed when a session is created.
///
/// Loadable from TOML or JSON; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Keep visited pages for back/forward.
    #[serde(default = "default_true")]
    pub history: bool,
    /// History capacity; the oldest page is evicted beyond it.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Rewrite every page's links to absolute URLs on load.
    #[serde(default)]
    pub absolute_links: bool,
    /// Retries after the first attempt on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff unit: retry `k` waits `k * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Politeness delay after each successful request, drawn uniformly
    /// from `[low, high)` milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<(u64, u64)>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User agent: unset for the crate default, `"impersonate"` for a
    /// real browser agent, anything else verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Proxy used for every request (`host:port` or a proxy URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Headers sent with every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Fail when no parser accepts a response's content type. When off,
    /// the response is returned but not committed to the session.
    #[serde(default = "default_true")]
    pub strict_parsers: bool,
    /// Workers used by `download_many` when the caller does not say.
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history: true,
            max_history: DEFAULT_MAX_HISTORY,
            absolute_links: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            delay: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
            proxy: None,
            headers: BTreeMap::new(),
            strict_parsers: true,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            source_path: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are read as JSON, anything else as TOML.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config: SessionConfig = match ext {
            "json" => serde_json::from_str(&contents)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?,
            _ => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?,
        };

        config.validate()?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Reject values that cannot drive a session.
    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            return Err(Error::Config("max_history must be at least 1".to_string()));
        }
        if let Some((low, high)) = self.delay {
            if low > high {
                return Err(Error::Config(format!(
                    "delay interval is inverted: [{}, {})",
                    low, high
                )));
            }
        }
        if self.download_workers == 0 {
            return Err(Error::Config("download_workers must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn with_history(mut self, enabled: bool) -> Self {
        self.history = enabled;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_absolute_links(mut self, enabled: bool) -> Self {
        self.absolute_links = enabled;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_delay(mut self, low: Duration, high: Duration) -> Self {
        self.delay = Some((low.as_millis() as u64, high.as_millis() as u64));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_strict_parsers(mut self, strict: bool) -> Self {
        self.strict_parsers = strict;
        self
    }

    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers;
        self
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Settings for the default reqwest transport.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout(),
            user_agent: resolve_user_agent(self.user_agent.as_deref()),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(config.history);
        assert_eq!(config.max_history, 5);
        assert_eq!(config.max_retries, 3);
        assert!(config.strict_parsers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_fills_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            max_history = 10
            absolute_links = true
            delay = [100, 500]
            user_agent = "impersonate"

            [headers]
            accept-language = "en"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_history, 10);
        assert!(config.absolute_links);
        assert_eq!(config.delay, Some((100, 500)));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.headers.get("accept-language").unwrap(), "en");
        assert!(config.transport_config().user_agent.contains("Mozilla"));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let err = SessionConfig::from_toml_str(r#"max_retries = "three""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate() {
        assert!(SessionConfig::new().with_max_history(0).validate().is_err());
        assert!(SessionConfig::new().with_download_workers(0).validate().is_err());
        assert!(SessionConfig::new()
            .with_delay(Duration::from_millis(500), Duration::from_millis(100))
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, r#"{"history": false, "max_retries": 0}"#)
            .await
            .unwrap();

        let config = SessionConfig::load(&path).await.unwrap();
        assert!(!config.history);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
    }
}
