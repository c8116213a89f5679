//! Whole-collection snapshots as `.tar.gz` archives.
//!
//! An archive holds a consistent copy of the database taken with the online
//! backup API (stored as `collection.restore.db`) next to every other file of
//! the home: pictures and side files. The live database, its journals, the
//! lock file and the `backups/` directory are never archived.

use chrono::Utc;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::DatabaseName;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::home::{
    CollectionHome, APP_DATA_DIR_NAME, BACKUPS_DIR_NAME, DATABASE_FILE_NAME, LOCK_FILE_NAME,
    RESTORE_FILE_NAME,
};

pub const ARCHIVE_EXTENSION: &str = "tar.gz";
pub const AUTOSAVE_PREFIX: &str = "autosave-";
pub const DEFAULT_AUTOSAVE_LIMIT: usize = 5;

/// Write a snapshot of the whole collection to `target`.
///
/// Nothing in the home is modified, so every failure is clean. A partly
/// written archive is removed again.
pub fn backup_to_file(db: &Database, target: &Path) -> Result<()> {
    let home = db.home();
    let staging = tempfile::tempdir()?;
    let snapshot = staging.path().join(RESTORE_FILE_NAME);
    db.conn()?.backup(DatabaseName::Main, &snapshot, None)?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    match write_archive(home, &snapshot, target) {
        Ok(count) => {
            info!("Backed up {} entries of {:?} to {:?}", count, home.root(), target);
            Ok(())
        }
        Err(e) => {
            error!("Backup to {:?} failed: {}", target, e);
            if let Err(remove_err) = fs::remove_file(target) {
                warn!("Could not remove partial archive {:?}: {}", target, remove_err);
            }
            Err(e)
        }
    }
}

fn write_archive(home: &CollectionHome, snapshot: &Path, target: &Path) -> Result<usize> {
    let file = BufWriter::new(File::create(target)?);
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    tar.append_path_with_name(snapshot, RESTORE_FILE_NAME)?;
    let mut count = 1;

    let root = home.root();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(|rel| !is_excluded(rel))
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = entry?;
        if entry.path() == target {
            continue;
        }
        let rel = entry.path().strip_prefix(root).map_err(|e| {
            StoreError::Archive(format!("{}: {}", entry.path().display(), e))
        })?;

        if entry.file_type().is_dir() {
            tar.append_dir(rel, entry.path())?;
        } else if entry.file_type().is_file() {
            tar.append_path_with_name(entry.path(), rel)?;
        } else {
            debug!("Skipping {:?} in backup", entry.path());
            continue;
        }
        count += 1;
    }

    let mut file = tar.into_inner()?.finish()?;
    file.flush()?;
    Ok(count)
}

/// Paths relative to the home that never go into an archive or get cleared
/// by a restore.
fn is_excluded(rel: &Path) -> bool {
    let mut components = rel.components();
    let Some(Component::Normal(first)) = components.next() else {
        return true;
    };
    let first = first.to_string_lossy();
    if first == BACKUPS_DIR_NAME {
        return true;
    }
    match (components.next(), components.next()) {
        (None, _) => {
            first == DATABASE_FILE_NAME || first.starts_with(&format!("{DATABASE_FILE_NAME}-"))
        }
        (Some(Component::Normal(second)), None) => {
            first == APP_DATA_DIR_NAME && second == LOCK_FILE_NAME
        }
        _ => false,
    }
}

/// Directories that hold an excluded entry and are therefore emptied, not removed.
fn holds_excluded(rel: &Path) -> bool {
    rel == Path::new(APP_DATA_DIR_NAME)
}

/// Replace the collection with the contents of `source`.
///
/// The archive is unpacked and checked before the home is touched, so a
/// corrupt or foreign archive fails clean. Failures after the home has been
/// cleared are dirty.
pub fn restore_from_file(db: &mut Database, source: &Path) -> Result<()> {
    let staging = tempfile::tempdir()?;
    {
        let file = BufReader::new(File::open(source)?);
        let mut archive = Archive::new(GzDecoder::new(file));
        archive
            .unpack(staging.path())
            .map_err(|e| StoreError::Archive(format!("{}: {}", source.display(), e)))?;
    }
    if !staging.path().join(RESTORE_FILE_NAME).is_file() {
        return Err(StoreError::Archive(format!(
            "{} does not contain {}",
            source.display(),
            RESTORE_FILE_NAME
        )));
    }

    info!("Restoring {:?} from {:?}", db.home().root(), source);
    replace_home(db, staging.path()).map_err(|e| {
        error!("Restore from {:?} failed: {}", source, e);
        e.into_dirty("restore collection from archive")
    })
}

fn replace_home(db: &mut Database, unpacked: &Path) -> Result<()> {
    let home = db.home().clone();
    clear_home(&home)?;
    copy_tree(unpacked, home.root())?;

    let restore_file = home.restore_file();
    db.conn_mut()?
        .restore(DatabaseName::Main, &restore_file, None::<fn(rusqlite::backup::Progress)>)?;
    fs::remove_file(&restore_file)?;

    home.ensure_structure()?;
    db.reload_side_files()?;
    for album in db.list_albums()? {
        home.ensure_album_dirs(&album.table_name)?;
    }
    Ok(())
}

fn clear_home(home: &CollectionHome) -> Result<()> {
    clear_dir(home.root(), home.root())
}

fn clear_dir(root: &Path, dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map_err(|e| StoreError::Archive(format!("{}: {}", path.display(), e)))?;
        if is_excluded(rel) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            if holds_excluded(rel) {
                clear_dir(root, &path)?;
            } else {
                fs::remove_dir_all(&path)?;
            }
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| StoreError::Archive(e.to_string()))?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Write a timestamped archive into `backups/` and keep only the newest `limit`.
pub fn auto_save(db: &Database, limit: usize) -> Result<PathBuf> {
    let name = format!(
        "{AUTOSAVE_PREFIX}{}.{ARCHIVE_EXTENSION}",
        Utc::now().format("%Y%m%d-%H%M%S%3f")
    );
    let target = db.home().backups_dir().join(name);
    backup_to_file(db, &target)?;

    let saves = list_auto_saves(db.home())?;
    let excess = saves.len().saturating_sub(limit.max(1));
    for old in &saves[..excess] {
        match fs::remove_file(old) {
            Ok(()) => debug!("Removed old auto-save {:?}", old),
            Err(e) => warn!("Could not remove old auto-save {:?}: {}", old, e),
        }
    }
    Ok(target)
}

/// Auto-save archives of `home`, oldest first.
pub fn list_auto_saves(home: &CollectionHome) -> Result<Vec<PathBuf>> {
    let dir = home.backups_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let suffix = format!(".{ARCHIVE_EXTENSION}");
    let mut saves: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|n| n.starts_with(AUTOSAVE_PREFIX) && n.ends_with(&suffix))
        })
        .collect();
    saves.sort();
    Ok(saves)
}
