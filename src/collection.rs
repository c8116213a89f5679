//! An open collection: the album store plus its saved searches.
//!
//! Album renames and drops go through here so saved searches follow their
//! album.

use std::path::Path;
use tracing::info;

use crate::backup;
use crate::db::{Album, Database};
use crate::error::Result;
use crate::saved_search::SavedSearchManager;

pub struct Collection {
    db: Database,
    searches: SavedSearchManager,
}

impl Collection {
    pub fn open(home: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(home)?;
        let searches = SavedSearchManager::for_database(&db)?;
        Ok(Self { db, searches })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn saved_searches(&self) -> &SavedSearchManager {
        &self.searches
    }

    pub fn saved_searches_mut(&mut self) -> &mut SavedSearchManager {
        &mut self.searches
    }

    /// Rename an album and move its saved searches along.
    ///
    /// The album is renamed first; failing to update the side file afterwards
    /// is reported dirty.
    pub fn rename_album(&mut self, old: &str, new: &str) -> Result<Album> {
        let album = self.db.rename_album(old, new)?;
        self.searches
            .rename_album(old, &album.name)
            .map_err(|e| e.into_dirty("rename saved searches of album"))?;
        Ok(album)
    }

    pub fn drop_album(&mut self, name: &str) -> Result<()> {
        self.db.drop_album(name)?;
        self.searches
            .remove_all(name)
            .map_err(|e| e.into_dirty("remove saved searches of album"))
    }

    /// Replace the collection from an archive and reload its saved searches.
    pub fn restore_from_file(&mut self, source: &Path) -> Result<()> {
        backup::restore_from_file(&mut self.db, source)?;
        self.searches = SavedSearchManager::for_database(&self.db)
            .map_err(|e| e.into_dirty("reload saved searches"))?;
        info!("Collection restored from {:?}", source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MetaItemField;
    use crate::query::{QueryComponent, QueryOperator};
    use crate::saved_search::SavedSearch;
    use crate::types::FieldType;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> Collection {
        let mut collection = Collection::open(dir).unwrap();
        collection
            .db_mut()
            .create_album("Books", &[MetaItemField::new("Author", FieldType::Text)], false)
            .unwrap();
        collection
            .saved_searches_mut()
            .add(SavedSearch::new(
                "Pratchett",
                "Books",
                vec![QueryComponent::new("Author", QueryOperator::Contains, "Pratchett")],
                true,
            ))
            .unwrap();
        collection
    }

    #[test]
    fn test_rename_moves_saved_searches() {
        let dir = tempdir().unwrap();
        let mut collection = setup(dir.path());

        collection.rename_album("Books", "Novels").unwrap();
        assert!(collection.saved_searches().searches_for("Books").is_empty());
        let search = collection.saved_searches().get("Novels", "Pratchett").unwrap();
        let query = search.query(collection.db()).unwrap();
        assert!(query.starts_with("SELECT * FROM 'novels'"));
    }

    #[test]
    fn test_drop_removes_saved_searches() {
        let dir = tempdir().unwrap();
        let mut collection = setup(dir.path());

        collection.drop_album("Books").unwrap();
        assert!(collection.saved_searches().all().is_empty());
    }

    #[test]
    fn test_restore_reloads_saved_searches() {
        let dir = tempdir().unwrap();
        let mut collection = setup(&dir.path().join("home"));
        let archive = dir.path().join("books.tar.gz");
        backup::backup_to_file(collection.db(), &archive).unwrap();

        collection.drop_album("Books").unwrap();
        collection.restore_from_file(&archive).unwrap();
        assert!(collection.saved_searches().get("Books", "Pratchett").is_some());
    }
}
