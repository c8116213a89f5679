//! Album ordering and last-modified side file (`app-data/albums.toml`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumEntry {
    pub name: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AlbumsFile {
    #[serde(default)]
    album: Vec<AlbumEntry>,
}

/// User-visible album order plus the last time each album changed.
#[derive(Debug)]
pub struct AlbumOrder {
    path: PathBuf,
    entries: Vec<AlbumEntry>,
}

impl AlbumOrder {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let file: AlbumsFile =
                toml::from_str(&content).map_err(|e| StoreError::side_file(path, e))?;
            file.album
        } else {
            Vec::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = AlbumsFile {
            album: self.entries.clone(),
        };
        let content =
            toml::to_string_pretty(&file).map_err(|e| StoreError::side_file(&self.path, e))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn entries(&self) -> &[AlbumEntry] {
        &self.entries
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn last_modified(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.last_modified)
    }

    /// Record a change to `name`, appending it when it is not listed yet.
    pub fn touch(&mut self, name: &str) -> Result<()> {
        let now = Utc::now();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.last_modified = Some(now),
            None => self.entries.push(AlbumEntry {
                name: name.to_string(),
                last_modified: Some(now),
            }),
        }
        self.save()
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == old) {
            entry.name = new.to_string();
            entry.last_modified = Some(Utc::now());
        }
        self.save()
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.entries.retain(|e| e.name != name);
        self.save()
    }

    /// Move `name` to `index`, clamped to the end of the list.
    pub fn move_to(&mut self, name: &str, index: usize) -> Result<bool> {
        let Some(from) = self.position(name) else {
            return Ok(false);
        };
        let entry = self.entries.remove(from);
        let to = index.min(self.entries.len());
        self.entries.insert(to, entry);
        self.save()?;
        Ok(true)
    }

    /// Drop entries for albums that no longer exist.
    pub fn retain_existing(&mut self, existing: &[String]) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|e| existing.contains(&e.name));
        if self.entries.len() != before {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_touch_rename_and_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("albums.toml");

        let mut order = AlbumOrder::load(&path).unwrap();
        order.touch("Books").unwrap();
        order.touch("DVDs").unwrap();
        order.rename("Books", "Novels").unwrap();

        let reloaded = AlbumOrder::load(&path).unwrap();
        let names: Vec<_> = reloaded.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Novels", "DVDs"]);
        assert!(reloaded.last_modified("DVDs").is_some());
    }

    #[test]
    fn test_move_to_clamps() {
        let dir = tempdir().unwrap();
        let mut order = AlbumOrder::load(&dir.path().join("albums.toml")).unwrap();
        for name in ["A", "B", "C"] {
            order.touch(name).unwrap();
        }

        assert!(order.move_to("A", 10).unwrap());
        assert!(!order.move_to("Z", 0).unwrap());
        let names: Vec<_> = order.entries().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, ["B", "C", "A"]);

        order.retain_existing(&["C".to_string()]).unwrap();
        assert_eq!(order.entries().len(), 1);
    }
}
