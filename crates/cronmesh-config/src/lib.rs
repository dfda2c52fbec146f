use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cronmesh_types::KeyNamespace;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Execution log store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogStoreConfig {
    /// SQLite database file. Defaults to `~/.cronmesh/logs.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl LogStoreConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn resolve_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("logs.db")),
        }
    }
}

/// Batching policy of the log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSinkConfig {
    /// Records per flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum time a partial batch waits before being flushed.
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_commit_timeout_ms() -> u64 {
    1000
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            commit_timeout_ms: default_commit_timeout_ms(),
        }
    }
}

/// Coordination-store key layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Prefix prepended to `jobs/`, `killer/` and `workers/`.
    #[serde(default)]
    pub root: String,
}

impl KeysConfig {
    pub fn namespace(&self) -> KeyNamespace {
        KeyNamespace::with_root(self.root.clone())
    }
}

/// How cron expressions are evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Zone cron fields are read in: `local`, `utc` or an offset like `+08:00`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "local".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

/// Top-level cronmesh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronMeshConfig {
    /// Tracing level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_store: LogStoreConfig,
    #[serde(default)]
    pub log_sink: LogSinkConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CronMeshConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_store: LogStoreConfig::default(),
            log_sink: LogSinkConfig::default(),
            keys: KeysConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

/// Resolve the cronmesh config directory (~/.cronmesh/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".cronmesh"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.cronmesh/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<CronMeshConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<CronMeshConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(CronMeshConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: CronMeshConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Write configuration to `path`, creating its directory if needed.
pub fn save_config_to(config: &CronMeshConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CronMeshConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_sink.batch_size, 100);
        assert_eq!(config.log_sink.commit_timeout_ms, 1000);
        assert!(config.log_store.path.is_none());
        assert_eq!(config.keys.namespace().job_key("a"), "jobs/a");
        assert_eq!(config.schedule.timezone, "local");
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            log_level: "debug",
            log_store: { path: "/var/lib/cronmesh/logs.db" },
            log_sink: { batch_size: 10 },
            keys: { root: "/cron/" },
            schedule: { timezone: "+08:00" },
        }"#;
        let config: CronMeshConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.log_store.resolve_path().unwrap(),
            PathBuf::from("/var/lib/cronmesh/logs.db")
        );
        assert_eq!(config.log_sink.batch_size, 10);
        assert_eq!(config.log_sink.commit_timeout_ms, 1000);
        assert_eq!(config.keys.namespace().job_key("job10"), "/cron/jobs/job10");
        assert_eq!(config.schedule.timezone, "+08:00");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json5");
        let mut config = CronMeshConfig::default();
        config.log_sink.batch_size = 7;
        config.keys.root = "/cron/".into();
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.log_sink.batch_size, 7);
        assert_eq!(loaded.keys.root, "/cron/");
    }

    #[test]
    fn test_invalid_json5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{ log_level: ").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Json5(_))));
    }
}
