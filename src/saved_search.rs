//! Named searches per album, kept in `app-data/saved-searches.toml`.
//!
//! Every mutation is written straight back to the file so the list in
//! memory and the list on disk never differ.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::query::QueryComponent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub name: String,
    pub album: String,
    #[serde(default)]
    pub components: Vec<QueryComponent>,
    #[serde(default = "default_combine_with_and")]
    pub combine_with_and: bool,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default = "default_sort_ascending")]
    pub sort_ascending: bool,
}

fn default_combine_with_and() -> bool {
    true
}

fn default_sort_ascending() -> bool {
    true
}

impl SavedSearch {
    pub fn new(
        name: impl Into<String>,
        album: impl Into<String>,
        components: Vec<QueryComponent>,
        combine_with_and: bool,
    ) -> Self {
        Self {
            name: name.into(),
            album: album.into(),
            components,
            combine_with_and,
            sort_field: None,
            sort_ascending: default_sort_ascending(),
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort_field = Some(field.into());
        self.sort_ascending = ascending;
        self
    }

    /// Build the query string against the album's current schema.
    pub fn query(&self, db: &Database) -> Result<String> {
        db.build_query(
            &self.components,
            self.combine_with_and,
            &self.album,
            self.sort_field.as_deref(),
            self.sort_ascending,
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedSearchFile {
    #[serde(default)]
    saved_search: Vec<SavedSearch>,
}

#[derive(Debug)]
pub struct SavedSearchManager {
    path: PathBuf,
    searches: Vec<SavedSearch>,
}

impl SavedSearchManager {
    /// Load the side file and drop searches whose album no longer exists.
    /// The pruned list is persisted right away.
    pub fn initialize(path: &Path, existing_albums: &[String]) -> Result<Self> {
        let searches = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let file: SavedSearchFile =
                toml::from_str(&content).map_err(|e| StoreError::side_file(path, e))?;
            file.saved_search
        } else {
            Vec::new()
        };

        let mut manager = Self {
            path: path.to_path_buf(),
            searches,
        };
        let before = manager.searches.len();
        manager
            .searches
            .retain(|s| existing_albums.iter().any(|a| *a == s.album));
        if manager.searches.len() != before {
            info!(
                "Pruned {} saved searches of deleted albums",
                before - manager.searches.len()
            );
        }
        manager.persist()?;
        Ok(manager)
    }

    /// Initialize from the side file of an open collection.
    pub fn for_database(db: &Database) -> Result<Self> {
        let albums: Vec<String> = db.list_albums()?.into_iter().map(|a| a.name).collect();
        Self::initialize(&db.home().saved_searches_file(), &albums)
    }

    pub fn all(&self) -> &[SavedSearch] {
        &self.searches
    }

    pub fn searches_for(&self, album: &str) -> Vec<&SavedSearch> {
        self.searches.iter().filter(|s| s.album == album).collect()
    }

    pub fn get(&self, album: &str, name: &str) -> Option<&SavedSearch> {
        self.searches
            .iter()
            .find(|s| s.album == album && s.name == name)
    }

    /// Add a search at the end of its album's list. A search with the same
    /// name in the same album is replaced in place.
    pub fn add(&mut self, search: SavedSearch) -> Result<()> {
        match self
            .searches
            .iter_mut()
            .find(|s| s.album == search.album && s.name == search.name)
        {
            Some(existing) => *existing = search,
            None => self.searches.push(search),
        }
        self.persist()
    }

    /// Returns whether a search was removed.
    pub fn remove(&mut self, album: &str, name: &str) -> Result<bool> {
        let before = self.searches.len();
        self.searches.retain(|s| !(s.album == album && s.name == name));
        let removed = self.searches.len() != before;
        self.persist()?;
        Ok(removed)
    }

    pub fn remove_all(&mut self, album: &str) -> Result<()> {
        self.searches.retain(|s| s.album != album);
        self.persist()
    }

    pub fn rename_album(&mut self, old: &str, new: &str) -> Result<()> {
        for search in self.searches.iter_mut().filter(|s| s.album == old) {
            search.album = new.to_string();
        }
        self.persist()
    }

    pub fn move_to_front(&mut self, album: &str, index: usize) -> Result<()> {
        self.reorder(album, index, |list, i| {
            if i > 0 {
                let entry = list.remove(i);
                list.insert(0, entry);
            }
        })
    }

    pub fn move_one_up(&mut self, album: &str, index: usize) -> Result<()> {
        self.reorder(album, index, |list, i| {
            if i > 0 {
                list.swap(i - 1, i);
            }
        })
    }

    pub fn move_one_down(&mut self, album: &str, index: usize) -> Result<()> {
        self.reorder(album, index, |list, i| {
            if i + 1 < list.len() {
                list.swap(i, i + 1);
            }
        })
    }

    pub fn move_to_bottom(&mut self, album: &str, index: usize) -> Result<()> {
        self.reorder(album, index, |list, i| {
            if i + 1 < list.len() {
                let entry = list.remove(i);
                list.push(entry);
            }
        })
    }

    /// Apply `op` to the album's own list and write the result back into the
    /// slots that album occupies in the file. Out of range indices do nothing.
    fn reorder(
        &mut self,
        album: &str,
        index: usize,
        op: impl FnOnce(&mut Vec<SavedSearch>, usize),
    ) -> Result<()> {
        let slots: Vec<usize> = self
            .searches
            .iter()
            .enumerate()
            .filter(|(_, s)| s.album == album)
            .map(|(i, _)| i)
            .collect();

        if index < slots.len() {
            let mut list: Vec<SavedSearch> =
                slots.iter().map(|&i| self.searches[i].clone()).collect();
            op(&mut list, index);
            for (slot, search) in slots.into_iter().zip(list) {
                self.searches[slot] = search;
            }
        } else {
            debug!("Ignoring reorder of '{}' at index {}", album, index);
        }
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = SavedSearchFile {
            saved_search: self.searches.clone(),
        };
        let content =
            toml::to_string_pretty(&file).map_err(|e| StoreError::side_file(&self.path, e))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryOperator;
    use tempfile::tempdir;

    fn names(manager: &SavedSearchManager, album: &str) -> Vec<String> {
        manager
            .searches_for(album)
            .into_iter()
            .map(|s| s.name.clone())
            .collect()
    }

    fn manager_with(path: &Path, entries: &[(&str, &str)]) -> SavedSearchManager {
        let albums = vec!["Books".to_string(), "DVDs".to_string()];
        let mut manager = SavedSearchManager::initialize(path, &albums).unwrap();
        for (album, name) in entries {
            manager
                .add(SavedSearch::new(*name, *album, Vec::new(), true))
                .unwrap();
        }
        manager
    }

    #[test]
    fn test_add_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved-searches.toml");
        let mut manager = manager_with(&path, &[]);

        let search = SavedSearch::new(
            "Old movies",
            "DVDs",
            vec![QueryComponent::new("Year", QueryOperator::Smaller, "1980")],
            false,
        )
        .sorted_by("Title", false);
        manager.add(search.clone()).unwrap();

        let reloaded =
            SavedSearchManager::initialize(&path, &["DVDs".to_string()]).unwrap();
        assert_eq!(reloaded.all(), &[search]);
    }

    #[test]
    fn test_initialize_prunes_missing_albums() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved-searches.toml");
        manager_with(&path, &[("Books", "a"), ("DVDs", "b"), ("Books", "c")]);

        let pruned = SavedSearchManager::initialize(&path, &["Books".to_string()]).unwrap();
        assert_eq!(names(&pruned, "Books"), ["a", "c"]);
        assert!(pruned.searches_for("DVDs").is_empty());

        // The pruned list was written back.
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("DVDs"));
    }

    #[test]
    fn test_reordering_stays_within_album() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved-searches.toml");
        let mut manager = manager_with(
            &path,
            &[("Books", "a"), ("DVDs", "x"), ("Books", "b"), ("Books", "c"), ("DVDs", "y")],
        );

        manager.move_to_front("Books", 2).unwrap();
        assert_eq!(names(&manager, "Books"), ["c", "a", "b"]);
        manager.move_one_down("Books", 0).unwrap();
        assert_eq!(names(&manager, "Books"), ["a", "c", "b"]);
        manager.move_to_bottom("Books", 0).unwrap();
        assert_eq!(names(&manager, "Books"), ["c", "b", "a"]);
        manager.move_one_up("Books", 2).unwrap();
        assert_eq!(names(&manager, "Books"), ["c", "a", "b"]);
        assert_eq!(names(&manager, "DVDs"), ["x", "y"]);

        let reloaded = SavedSearchManager::initialize(
            &path,
            &["Books".to_string(), "DVDs".to_string()],
        )
        .unwrap();
        assert_eq!(names(&reloaded, "Books"), ["c", "a", "b"]);
    }

    #[test]
    fn test_boundary_moves_are_no_ops() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved-searches.toml");
        let mut manager = manager_with(&path, &[("Books", "a"), ("Books", "b"), ("Books", "c")]);

        manager.move_one_up("Books", 0).unwrap();
        manager.move_to_front("Books", 0).unwrap();
        manager.move_one_down("Books", 2).unwrap();
        manager.move_to_bottom("Books", 2).unwrap();
        manager.move_one_down("Books", 17).unwrap();
        assert_eq!(names(&manager, "Books"), ["a", "b", "c"]);
    }

    #[test]
    fn test_remove_and_rename_album() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved-searches.toml");
        let mut manager = manager_with(&path, &[("Books", "a"), ("Books", "b"), ("DVDs", "x")]);

        assert!(manager.remove("Books", "a").unwrap());
        assert!(!manager.remove("Books", "a").unwrap());
        manager.rename_album("Books", "Novels").unwrap();
        assert_eq!(names(&manager, "Novels"), ["b"]);

        manager.remove_all("Novels").unwrap();
        assert!(manager.searches_for("Novels").is_empty());
        assert_eq!(names(&manager, "DVDs"), ["x"]);
    }

    #[test]
    fn test_same_name_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved-searches.toml");
        let mut manager = manager_with(&path, &[("Books", "a"), ("Books", "b")]);

        manager
            .add(SavedSearch::new("a", "Books", Vec::new(), false))
            .unwrap();
        assert_eq!(names(&manager, "Books"), ["a", "b"]);
        assert!(!manager.get("Books", "a").unwrap().combine_with_and);
    }
}
