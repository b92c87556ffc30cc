//! TOML configuration for the croncall daemon.
//!
//! Every section has compiled-in defaults, so an empty or partial file is
//! valid. The file is located via `--config`, then the `CRONCALL_CONFIG`
//! environment variable, then `/etc/croncall/croncall.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::scheduler::DEFAULT_CONCURRENCY;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CRONCALL_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/croncall/croncall.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CroncallConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CroncallConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the env var and
    /// system locations fall back to defaults when unusable.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Try, in order: `CRONCALL_CONFIG`, the system path, compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "CRONCALL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Parent directories are created on open.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/croncall.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Worker pool and invocation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum simultaneous in-flight invocations.
    pub concurrency: usize,
    /// Per-call timeout; a call that exceeds it is recorded with status 408.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for queued and in-flight calls before abandoning them.
    pub shutdown_grace_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CroncallConfig::default();
        assert_eq!(cfg.server.bind, "0.0.0.0:3000");
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/croncall.db"));
        assert_eq!(cfg.dispatch.concurrency, 10);
        assert_eq!(cfg.dispatch.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.dispatch.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_full_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:9000"

[storage]
db_path = "/var/lib/croncall/jobs.db"

[dispatch]
concurrency = 4
request_timeout_secs = 5
shutdown_grace_secs = 2

[logging]
level = "debug"
format = "json"
"#;

        let cfg: CroncallConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.storage.db_path, PathBuf::from("/var/lib/croncall/jobs.db"));
        assert_eq!(cfg.dispatch.concurrency, 4);
        assert_eq!(cfg.dispatch.request_timeout_secs, 5);
        assert_eq!(cfg.dispatch.shutdown_grace_secs, 2);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[dispatch]
concurrency = 25
"#;

        let cfg: CroncallConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.dispatch.concurrency, 25);
        assert_eq!(cfg.dispatch.request_timeout_secs, 30);
        assert_eq!(cfg.server.bind, "0.0.0.0:3000");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: CroncallConfig = toml::from_str("").unwrap();
        let defaults = CroncallConfig::default();
        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(cfg.dispatch.concurrency, defaults.dispatch.concurrency);
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let result: Result<CroncallConfig, _> = toml::from_str("[logging]\nformat = \"xml\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("croncall.toml");
        std::fs::write(&path, "[server]\nbind = \"0.0.0.0:9999\"\n").unwrap();

        let cfg = CroncallConfig::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = CroncallConfig::resolve(Some(Path::new("/nonexistent/croncall.toml")));
        assert!(result.is_err());
    }
}
