use crate::error::{EngineError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// NotificationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// When set, notifications are POSTed here; otherwise they are only logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff() -> u64 {
    30
}

fn default_max_backoff() -> u64 {
    3600
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3150
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Process-level engine settings, stored in `.standby/config.yaml`.
///
/// The automation policy is not here: it is a versioned record in the
/// engine database, changed through operator actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// How often the sweep monitor runs. Bounds timeout-detection latency.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

fn default_version() -> u32 {
    1
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            sweep_interval_secs: default_sweep_interval(),
            server: ServerConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    /// Load `.standby/config.yaml`. A missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Check config for values that will misbehave at runtime.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.sweep_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sweep_interval_secs must be greater than 0".into(),
            });
        } else if self.sweep_interval_secs > 3600 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "sweep_interval_secs is {}; response timeouts may be detected over an hour late",
                    self.sweep_interval_secs
                ),
            });
        }

        let n = &self.notifications;
        if n.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "notifications.max_attempts must be at least 1".into(),
            });
        }
        if n.base_backoff_secs > n.max_backoff_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "notifications.base_backoff_secs ({}) exceeds max_backoff_secs ({})",
                    n.base_backoff_secs, n.max_backoff_secs
                ),
            });
        }
        if let Some(url) = &n.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("notifications.webhook_url '{url}' is not an http(s) URL"),
                });
            }
        }

        warnings
    }

    /// Fail on the first `Error`-level warning.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(EngineError::InvalidValue(w.message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.sweep_interval_secs = 15;
        cfg.notifications.webhook_url = Some("https://hooks.example.com/standby".into());
        cfg.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("sweep_interval_secs: 5\n").unwrap();
        assert_eq!(cfg.sweep_interval_secs, 5);
        assert_eq!(cfg.notifications.max_attempts, 5);
        assert_eq!(cfg.server.port, 3150);
    }

    #[test]
    fn validate_default_has_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_zero_interval_and_bad_url() {
        let mut cfg = Config::default();
        cfg.sweep_interval_secs = 0;
        cfg.notifications.webhook_url = Some("ftp://nope".into());
        let warnings = cfg.validate();
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.level == WarnLevel::Error)
                .count(),
            2
        );
        assert!(cfg.ensure_valid().is_err());
    }

    #[test]
    fn validate_warns_on_inverted_backoff() {
        let mut cfg = Config::default();
        cfg.notifications.base_backoff_secs = 7200;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(cfg.ensure_valid().is_ok());
    }
}
