//! On-disk layout of a collection home directory.
//!
//! ```text
//! <home>/collection.db
//! <home>/album-pictures/<table>/{originals,thumbnails}/
//! <home>/app-data/{.lock, saved-searches.toml, albums.toml, settings.toml}
//! <home>/backups/
//! ```

pub mod albums;
pub mod settings;

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, StoreError};

pub const DATABASE_FILE_NAME: &str = "collection.db";
pub const RESTORE_FILE_NAME: &str = "collection.restore.db";
pub const ALBUM_PICTURES_DIR_NAME: &str = "album-pictures";
pub const APP_DATA_DIR_NAME: &str = "app-data";
pub const BACKUPS_DIR_NAME: &str = "backups";
pub const ORIGINALS_DIR_NAME: &str = "originals";
pub const THUMBNAILS_DIR_NAME: &str = "thumbnails";
pub const LOCK_FILE_NAME: &str = ".lock";

/// Paths of one collection home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHome {
    root: PathBuf,
}

impl CollectionHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_file(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn restore_file(&self) -> PathBuf {
        self.root.join(RESTORE_FILE_NAME)
    }

    pub fn app_data_dir(&self) -> PathBuf {
        self.root.join(APP_DATA_DIR_NAME)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR_NAME)
    }

    pub fn album_pictures_dir(&self) -> PathBuf {
        self.root.join(ALBUM_PICTURES_DIR_NAME)
    }

    pub fn album_dir(&self, table_name: &str) -> PathBuf {
        self.album_pictures_dir().join(table_name)
    }

    pub fn originals_dir(&self, table_name: &str) -> PathBuf {
        self.album_dir(table_name).join(ORIGINALS_DIR_NAME)
    }

    pub fn thumbnails_dir(&self, table_name: &str) -> PathBuf {
        self.album_dir(table_name).join(THUMBNAILS_DIR_NAME)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.app_data_dir().join(LOCK_FILE_NAME)
    }

    pub fn saved_searches_file(&self) -> PathBuf {
        self.app_data_dir().join("saved-searches.toml")
    }

    pub fn albums_file(&self) -> PathBuf {
        self.app_data_dir().join("albums.toml")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.app_data_dir().join("settings.toml")
    }

    /// Create the fixed directories of the home if they are missing.
    pub fn ensure_structure(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.app_data_dir(),
            self.album_pictures_dir(),
            self.backups_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn ensure_album_dirs(&self, table_name: &str) -> Result<()> {
        fs::create_dir_all(self.originals_dir(table_name))?;
        fs::create_dir_all(self.thumbnails_dir(table_name))?;
        Ok(())
    }

    pub fn remove_album_dir(&self, table_name: &str) -> Result<()> {
        let dir = self.album_dir(table_name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn rename_album_dir(&self, old_table: &str, new_table: &str) -> Result<()> {
        let from = self.album_dir(old_table);
        if !from.exists() {
            return Ok(());
        }
        fs::rename(&from, self.album_dir(new_table))?;
        Ok(())
    }
}

/// Exclusive claim on a collection home.
///
/// Holds an OS advisory lock on `app-data/.lock` for as long as it lives. The
/// lock dies with the process, so a crash never leaves the home locked; the
/// file itself stays behind and only records the last owner's pid.
#[derive(Debug)]
pub struct HomeLock {
    path: PathBuf,
    _file: File,
}

impl HomeLock {
    pub fn acquire(home: &CollectionHome) -> Result<Self> {
        let path = home.lock_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(StoreError::HomeLocked(home.root().to_path_buf()));
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        debug!("Acquired home lock at {:?}", path);
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let home = CollectionHome::new("/data/home");
        assert_eq!(home.database_file(), PathBuf::from("/data/home/collection.db"));
        assert_eq!(
            home.thumbnails_dir("dvds"),
            PathBuf::from("/data/home/album-pictures/dvds/thumbnails")
        );
        assert_eq!(home.lock_file(), PathBuf::from("/data/home/app-data/.lock"));
    }

    #[test]
    fn test_second_lock_is_refused() {
        let dir = tempdir().unwrap();
        let home = CollectionHome::new(dir.path());

        let lock = HomeLock::acquire(&home).unwrap();
        assert!(matches!(
            HomeLock::acquire(&home),
            Err(StoreError::HomeLocked(_))
        ));

        drop(lock);
        let again = HomeLock::acquire(&home).unwrap();
        assert_eq!(again.path(), home.lock_file());
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() {
        let dir = tempdir().unwrap();
        let home = CollectionHome::new(dir.path());
        home.ensure_structure().unwrap();
        // What a killed process leaves behind.
        fs::write(home.lock_file(), "4242\n").unwrap();

        let lock = HomeLock::acquire(&home).unwrap();
        let owner = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_album_dirs_lifecycle() {
        let dir = tempdir().unwrap();
        let home = CollectionHome::new(dir.path());
        home.ensure_structure().unwrap();
        home.ensure_album_dirs("books").unwrap();
        assert!(home.originals_dir("books").is_dir());

        home.rename_album_dir("books", "novels").unwrap();
        assert!(home.thumbnails_dir("novels").is_dir());
        assert!(!home.album_dir("books").exists());

        home.remove_album_dir("novels").unwrap();
        home.remove_album_dir("novels").unwrap();
        assert!(!home.album_dir("novels").exists());
    }
}
