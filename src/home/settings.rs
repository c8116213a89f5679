use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StoreError};

/// Per-home settings stored in `app-data/settings.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeSettings {
    /// chrono format string for displaying and parsing DATE values.
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_date_format() -> String {
    "%d/%m/%Y".to_string()
}

impl Default for HomeSettings {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
        }
    }
}

impl HomeSettings {
    /// Load the settings, writing the defaults when the file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| StoreError::side_file(path, e))
        } else {
            let settings = HomeSettings::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| StoreError::side_file(path, e))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
