use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backup::DEFAULT_AUTOSAVE_LIMIT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Collection home used when `--home` is not given.
    #[serde(default = "default_home")]
    pub home: PathBuf,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Number of auto-save archives kept in `backups/`.
    #[serde(default = "default_autosave_limit")]
    pub autosave_limit: usize,

    /// Write an auto-save when a modifying command finishes.
    #[serde(default = "default_autosave_on_exit")]
    pub autosave_on_exit: bool,
}

fn default_autosave_limit() -> usize {
    DEFAULT_AUTOSAVE_LIMIT
}

fn default_autosave_on_exit() -> bool {
    true
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            autosave_limit: default_autosave_limit(),
            autosave_on_exit: default_autosave_on_exit(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file when journald is unavailable.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Collectbox")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: default_home(),
            backup: BackupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read `path`, writing the defaults there first when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("collectbox")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("collectbox").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.backup.autosave_limit, 5);
        assert!(config.backup.autosave_on_exit);
        assert!(config.home.ends_with("Collectbox"));
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "home = \"/srv/stamps\"\n\n[backup]\nautosave_limit = 2\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/stamps"));
        assert_eq!(config.backup.autosave_limit, 2);
        assert!(config.backup.autosave_on_exit);
        assert_eq!(config.logging.directory, None);
    }
}
