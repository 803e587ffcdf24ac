//! Runtime configuration: `~/.grc/config.toml` plus environment overrides

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const DEFAULT_BIND: &str = "127.0.0.1:3030";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrcConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub storage: StorageSection,
    pub session: SessionSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backup_dir: PathBuf,
    pub upload_dir: PathBuf,
    /// Backups older than this are removed by cleanup
    pub keep_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub ttl_hours: u32,
}

impl Default for GrcConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            database: DatabaseSection::default(),
            storage: StorageSection::default(),
            session: SessionSection::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            cors_permissive: false,
        }
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        let base = grc_home();
        Self {
            backup_dir: base.join("backups"),
            upload_dir: base.join("uploads"),
            keep_days: 30,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self { ttl_hours: 12 }
    }
}

/// `~/.grc`, or `./.grc` when no home directory is known.
pub fn grc_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grc")
}

impl GrcConfig {
    /// `GRC_CONFIG` if set, otherwise `~/.grc/config.toml`.
    pub fn config_path() -> PathBuf {
        env::var_os("GRC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| grc_home().join("config.toml"))
    }

    /// Load from the default path and apply environment overrides.
    pub fn load() -> Result<Self, CoreError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| CoreError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `DATABASE_URL`, `GRC_BIND` and `GRC_BACKUP_DIR` win over file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(bind) = lookup("GRC_BIND").filter(|v| !v.is_empty()) {
            self.server.bind = bind;
        }
        if let Some(dir) = lookup("GRC_BACKUP_DIR").filter(|v| !v.is_empty()) {
            self.storage.backup_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.database.max_connections == 0 {
            return Err(CoreError::config("database.max_connections must be at least 1"));
        }
        if self.storage.keep_days == 0 {
            return Err(CoreError::config("storage.keep_days must be at least 1"));
        }
        if self.session.ttl_hours == 0 {
            return Err(CoreError::config("session.ttl_hours must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = GrcConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, GrcConfig::default());
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.storage.keep_days, 30);
        assert_eq!(config.session.ttl_hours, 12);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[server]\nbind = \"0.0.0.0:8080\"\n\n[storage]\nkeep_days = 7\n",
        )
        .unwrap();

        let config = GrcConfig::load_from(&path).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(!config.server.cors_permissive);
        assert_eq!(config.storage.keep_days, 7);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn invalid_toml_is_reported_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server\nbind = 1").unwrap();

        let err = GrcConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, CoreError::Toml { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://localhost/grc"),
            ("GRC_BIND", "0.0.0.0:9000"),
            ("GRC_BACKUP_DIR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = GrcConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/grc"));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.storage.backup_dir, StorageSection::default().backup_dir);
    }

    #[test]
    fn zero_values_rejected() {
        let mut config = GrcConfig::default();
        config.storage.keep_days = 0;
        assert!(config.validate().is_err());
    }
}
