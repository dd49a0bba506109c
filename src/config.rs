//! Terminal configuration.
//!
//! Loaded from a JSON file when the host provides one; every field has a
//! default so embedders can also start from [`TerminalConfig::default`] and
//! override programmatically. The environment falls back to the
//! `TESSERA_ENV` variable so packaging scripts can flip production mode
//! without editing the config file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TerminalError};

/// Runtime environment. Gates the simulated diagnostics stage: simulated
/// readings never appear in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    /// Reads `TESSERA_ENV`. Anything other than "production"/"prod" is
    /// treated as development.
    pub fn detect() -> Self {
        match std::env::var("TESSERA_ENV") {
            Ok(value)
                if value.eq_ignore_ascii_case("production")
                    || value.eq_ignore_ascii_case("prod") =>
            {
                Environment::Production
            }
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Organization this terminal belongs to. Card bindings are scoped to it.
    #[serde(default)]
    pub org_id: String,
    /// Read session watchdog in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_environment")]
    pub environment: Environment,
    /// Directory holding the SQLite database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Whether to play beeps and operator toasts through the bridge.
    #[serde(default = "default_feedback_enabled")]
    pub feedback_enabled: bool,
    /// Organization-local UTC offset in minutes; calendar days for visit
    /// accrual are computed in this offset.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Background health monitor interval. `None` disables the monitor;
    /// values below 10 seconds are clamped up.
    #[serde(default)]
    pub health_interval_secs: Option<u64>,
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_environment() -> Environment {
    Environment::detect()
}

fn default_feedback_enabled() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TESSERA_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.tessera.pos")
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            org_id: String::new(),
            read_timeout_ms: default_read_timeout_ms(),
            environment: default_environment(),
            data_dir: default_data_dir(),
            feedback_enabled: default_feedback_enabled(),
            utc_offset_minutes: 0,
            health_interval_secs: None,
        }
    }
}

impl TerminalConfig {
    /// Parses a config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path).map_err(|e| {
            TerminalError::config(format!("read {}: {e}", path.display()))
        })?;
        let config: TerminalConfig = serde_json::from_str(&body)
            .map_err(|e| TerminalError::config(format!("parse {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but an absent file is not an error; the
    /// terminal starts from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TerminalError::config(format!("create {}: {e}", parent.display()))
            })?;
        }
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| TerminalError::config(format!("serialize config: {e}")))?;
        fs::write(path, body)
            .map_err(|e| TerminalError::config(format!("write {}: {e}", path.display())))?;
        Ok(())
    }

    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = TerminalConfig {
            environment: Environment::Development,
            ..TerminalConfig::default()
        };
        assert_eq!(config.read_timeout_ms, 30_000);
        assert!(config.feedback_enabled);
        assert_eq!(config.utc_offset_minutes, 0);
        assert!(config.health_interval_secs.is_none());
        assert_eq!(config.read_timeout(), std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_takes_defaults_for_the_rest() {
        let config: TerminalConfig =
            serde_json::from_str(r#"{"org_id": "org-7", "read_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.org_id, "org-7");
        assert_eq!(config.read_timeout_ms, 5000);
        assert!(config.feedback_enabled);
    }

    #[test]
    fn test_environment_parses_lowercase() {
        let config: TerminalConfig =
            serde_json::from_str(r#"{"environment": "production"}"#).unwrap();
        assert!(config.environment.is_production());
    }

    #[test]
    fn test_load_or_default_tolerates_missing_file() {
        let path = std::env::temp_dir().join(format!("cfg_missing_{}.json", uuid::Uuid::new_v4()));
        let config = TerminalConfig::load_or_default(&path).unwrap();
        assert_eq!(config.read_timeout_ms, 30_000);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("cfg_test_{}", uuid::Uuid::new_v4()));
        let path = dir.join("terminal.json");

        let mut config = TerminalConfig::default();
        config.org_id = "org-42".into();
        config.utc_offset_minutes = 120;
        config.save(&path).unwrap();

        let loaded = TerminalConfig::load(&path).unwrap();
        assert_eq!(loaded.org_id, "org-42");
        assert_eq!(loaded.utc_offset_minutes, 120);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_garbage_file_is_a_config_error() {
        let dir = std::env::temp_dir().join(format!("cfg_bad_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("terminal.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = TerminalConfig::load(&path).unwrap_err();
        assert!(matches!(err, TerminalError::Config { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    #[serial]
    fn test_environment_detection() {
        std::env::set_var("TESSERA_ENV", "production");
        assert_eq!(Environment::detect(), Environment::Production);

        std::env::set_var("TESSERA_ENV", "Prod");
        assert_eq!(Environment::detect(), Environment::Production);

        std::env::set_var("TESSERA_ENV", "development");
        assert_eq!(Environment::detect(), Environment::Development);

        std::env::remove_var("TESSERA_ENV");
        assert_eq!(Environment::detect(), Environment::Development);
    }
}
