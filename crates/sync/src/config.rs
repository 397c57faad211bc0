//! Synchronizer configuration.
//!
//! Layered: defaults < `config.toml` < `MISSO_*` environment < explicit
//! overrides applied by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::fetcher::parse_base_url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8001";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Request/response endpoint root
    pub base_url: String,
    /// Push endpoint; derived from `base_url` when unset
    pub stream_url: Option<String>,
    /// Skip `GET /config` and bind this operator directly
    pub operator: Option<String>,
    pub reconnect_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_url: None,
            operator: None,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(
                component = "config",
                event = "config.file.missing",
                path = %path.display(),
                "No config file, using defaults"
            );
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay values from any `MISSO_*` lookup.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MISSO_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = get("MISSO_STREAM_URL") {
            self.stream_url = Some(v);
        }
        if let Some(v) = get("MISSO_OPERATOR") {
            self.operator = Some(v);
        }
        if let Some(v) = get("MISSO_RECONNECT_DELAY_MS") {
            self.reconnect_delay_ms = parse_ms("MISSO_RECONNECT_DELAY_MS", &v)?;
        }
        if let Some(v) = get("MISSO_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_ms("MISSO_REQUEST_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Explicit `stream_url`, or `<base_url>/ws` with the scheme switched to ws/wss.
    pub fn resolved_stream_url(&self) -> Result<String> {
        if let Some(url) = &self.stream_url {
            return Ok(url.clone());
        }

        let mut url = parse_base_url(&self.base_url)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|_| SyncError::InvalidUrl {
            url: self.base_url.clone(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
        let url = url.join("ws").map_err(|e| SyncError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(url.to_string())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{key} must be milliseconds, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_backend() {
        let config = SyncConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:8001");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(
            config.resolved_stream_url().unwrap(),
            "ws://127.0.0.1:8001/ws"
        );
    }

    #[test]
    fn https_base_derives_wss_stream() {
        let config = SyncConfig {
            base_url: "https://dock.example.org/api".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_stream_url().unwrap(),
            "wss://dock.example.org/api/ws"
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            operator = "Dr.Raj"
            reconnect_delay_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.operator.as_deref(), Some("Dr.Raj"));
        assert_eq!(config.reconnect_delay_ms, 500);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MISSO_BASE_URL", "http://10.0.0.2:9000"),
            ("MISSO_OPERATOR", "Dr.Meril M"),
            ("MISSO_STREAM_URL", ""),
        ]);
        let mut config = SyncConfig {
            operator: Some("Dr.Raj".to_string()),
            ..Default::default()
        };
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.base_url, "http://10.0.0.2:9000");
        assert_eq!(config.operator.as_deref(), Some("Dr.Meril M"));
        assert!(config.stream_url.is_none());
    }

    #[test]
    fn bad_delay_is_a_config_error() {
        let mut config = SyncConfig::default();
        let err = config
            .apply_vars(|k| (k == "MISSO_RECONNECT_DELAY_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn load_reads_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(SyncConfig::load(&path).unwrap(), SyncConfig::default());

        std::fs::write(&path, "base_url = \"http://backend:8001\"\n").unwrap();
        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.base_url, "http://backend:8001");
    }
}
