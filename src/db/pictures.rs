//! Item pictures: file handling and the per-album pictures table.

use image::ImageFormat;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::home::CollectionHome;

use super::schema::{
    pictures_table, quote_table, ITEM_FOREIGN_KEY_COLUMN, ORIGINAL_FILENAME_COLUMN,
    THUMBNAIL_FILENAME_COLUMN,
};
use super::{albums, AlbumItem, Database};

/// Longest side of a generated thumbnail, in pixels.
pub const THUMBNAIL_MAX_SIDE: u32 = 200;

/// A stored picture: original copy plus thumbnail.
///
/// `album_item_id` stays `None` until the owning item has been inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumItemPicture {
    pub thumbnail_file_name: String,
    pub original_file_name: String,
    pub album: String,
    pub album_item_id: Option<i64>,
}

/// Writes originals and thumbnails into one album's picture directories.
pub struct PictureStore {
    originals_dir: PathBuf,
    thumbnails_dir: PathBuf,
    max_side: u32,
}

impl PictureStore {
    pub fn new(home: &CollectionHome, table: &str) -> Self {
        Self {
            originals_dir: home.originals_dir(table),
            thumbnails_dir: home.thumbnails_dir(table),
            max_side: THUMBNAIL_MAX_SIDE,
        }
    }

    pub fn original_path(&self, file_name: &str) -> PathBuf {
        self.originals_dir.join(file_name)
    }

    pub fn thumbnail_path(&self, file_name: &str) -> PathBuf {
        self.thumbnails_dir.join(file_name)
    }

    /// Write a thumbnail and copy the original, each under its own UUID name.
    /// Returns `(original_file_name, thumbnail_file_name)`.
    pub fn store(&self, source: &Path) -> Result<(String, String)> {
        fs::create_dir_all(&self.originals_dir)?;
        fs::create_dir_all(&self.thumbnails_dir)?;

        let img = image::open(source)?;
        let thumbnail = if img.width() <= self.max_side && img.height() <= self.max_side {
            img
        } else {
            img.thumbnail(self.max_side, self.max_side)
        };

        let thumbnail_name = format!("{}.png", Uuid::new_v4());
        let thumbnail_path = self.thumbnail_path(&thumbnail_name);
        thumbnail.save_with_format(&thumbnail_path, ImageFormat::Png)?;

        let original_name = match source.extension() {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_string_lossy().to_lowercase()),
            None => Uuid::new_v4().to_string(),
        };
        if let Err(e) = fs::copy(source, self.original_path(&original_name)) {
            discard_file(&thumbnail_path);
            return Err(e.into());
        }

        debug!("Stored picture {:?} as {}", source, original_name);
        Ok((original_name, thumbnail_name))
    }

    /// Remove both files of each picture. Returns the paths that could not be removed.
    pub fn remove(&self, pictures: &[AlbumItemPicture]) -> Vec<PathBuf> {
        let mut failed = Vec::new();
        for picture in pictures {
            for path in [
                self.original_path(&picture.original_file_name),
                self.thumbnail_path(&picture.thumbnail_file_name),
            ] {
                if !discard_file(&path) {
                    failed.push(path);
                }
            }
        }
        failed
    }
}

/// Remove a picture file, logging failures. A missing file counts as removed.
fn discard_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Could not remove picture file {:?}: {}", path, e);
            false
        }
    }
}

impl Database {
    /// Process an image file for `album` and return the picture to attach to an item.
    pub fn store_picture(&self, album: &str, source: &Path) -> Result<AlbumItemPicture> {
        let album = albums::require_album(self.conn()?, album)?;
        if !album.has_pictures {
            return Err(StoreError::PicturesDisabled(album.name));
        }

        let (original, thumbnail) = self.picture_store(&album.table_name).store(source)?;
        Ok(AlbumItemPicture {
            thumbnail_file_name: thumbnail,
            original_file_name: original,
            album: album.name,
            album_item_id: None,
        })
    }

    pub fn picture_store(&self, table: &str) -> PictureStore {
        PictureStore::new(&self.home, table)
    }

    pub fn original_picture_path(&self, picture: &AlbumItemPicture) -> Result<PathBuf> {
        let album = albums::require_album(self.conn()?, &picture.album)?;
        Ok(self
            .picture_store(&album.table_name)
            .original_path(&picture.original_file_name))
    }

    pub fn thumbnail_picture_path(&self, picture: &AlbumItemPicture) -> Result<PathBuf> {
        let album = albums::require_album(self.conn()?, &picture.album)?;
        Ok(self
            .picture_store(&album.table_name)
            .thumbnail_path(&picture.thumbnail_file_name))
    }

    /// Store `sources` as pictures of `item` and insert it.
    ///
    /// Files copied before a failed insert are removed again; only when that
    /// cleanup fails is the error reported as dirty.
    pub fn add_item_with_pictures(
        &mut self,
        mut item: AlbumItem,
        sources: &[PathBuf],
        regenerate_content_version: bool,
    ) -> Result<i64> {
        let table = albums::require_album(self.conn()?, &item.album)?.table_name;
        let store = self.picture_store(&table);

        let mut stored = Vec::new();
        let mut result = Ok(());
        for source in sources {
            match self.store_picture(&item.album, source) {
                Ok(picture) => stored.push(picture),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let result = result.and_then(|()| {
            item.pictures.extend(stored.iter().cloned());
            self.add_item(&item, regenerate_content_version)
        });

        result.map_err(|err| {
            let leftovers = store.remove(&stored);
            if leftovers.is_empty() {
                err
            } else {
                err.into_dirty("remove pictures of a failed insert")
            }
        })
    }
}

pub(crate) fn insert_picture_rows(
    conn: &Connection,
    table: &str,
    item_id: i64,
    pictures: &[AlbumItemPicture],
) -> Result<()> {
    if pictures.is_empty() {
        return Ok(());
    }
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} ({ORIGINAL_FILENAME_COLUMN}, {THUMBNAIL_FILENAME_COLUMN}, {ITEM_FOREIGN_KEY_COLUMN}) \
         VALUES (?1, ?2, ?3)",
        quote_table(&pictures_table(table))
    ))?;
    for picture in pictures {
        stmt.execute(params![
            picture.original_file_name,
            picture.thumbnail_file_name,
            item_id
        ])?;
    }
    Ok(())
}

pub(crate) fn load_picture_rows(
    conn: &Connection,
    album: &str,
    table: &str,
    item_id: i64,
) -> Result<Vec<AlbumItemPicture>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ORIGINAL_FILENAME_COLUMN}, {THUMBNAIL_FILENAME_COLUMN} FROM {} \
         WHERE {ITEM_FOREIGN_KEY_COLUMN} = ?1 ORDER BY id",
        quote_table(&pictures_table(table))
    ))?;
    let pictures = stmt
        .query_map([item_id], |row| {
            Ok(AlbumItemPicture {
                original_file_name: row.get(0)?,
                thumbnail_file_name: row.get(1)?,
                album: album.to_string(),
                album_item_id: Some(item_id),
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(pictures)
}

pub(crate) fn delete_picture_rows(conn: &Connection, table: &str, item_id: i64) -> Result<()> {
    conn.execute(
        &format!(
            "DELETE FROM {} WHERE {ITEM_FOREIGN_KEY_COLUMN} = ?1",
            quote_table(&pictures_table(table))
        ),
        [item_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MetaItemField;
    use crate::types::{FieldType, FieldValue};
    use image::RgbImage;
    use tempfile::tempdir;

    fn write_test_image(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_thumbnail_is_bounded_and_keeps_aspect_ratio() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("wide.png");
        write_test_image(&source, 800, 400);

        let home = CollectionHome::new(dir.path().join("home"));
        let store = PictureStore::new(&home, "stamps");
        let (original, thumbnail) = store.store(&source).unwrap();

        assert!(original.ends_with(".png"));
        assert_ne!(original, thumbnail);
        let thumb = image::open(store.thumbnail_path(&thumbnail)).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (200, 100));
        assert_eq!(
            fs::read(&source).unwrap(),
            fs::read(store.original_path(&original)).unwrap()
        );
    }

    #[test]
    fn test_small_images_are_not_upscaled() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("small.png");
        write_test_image(&source, 50, 80);

        let store = PictureStore::new(&CollectionHome::new(dir.path()), "stamps");
        let (_, thumbnail) = store.store(&source).unwrap();
        let thumb = image::open(store.thumbnail_path(&thumbnail)).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (50, 80));
    }

    #[test]
    fn test_discard_file_reports_failures() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("thumb.png");
        fs::write(&file, b"png").unwrap();

        assert!(discard_file(&file));
        assert!(!file.exists());
        assert!(discard_file(&file));

        let occupied = dir.path().join("not-a-file");
        fs::create_dir(&occupied).unwrap();
        assert!(!discard_file(&occupied));
        assert!(occupied.is_dir());
    }

    #[test]
    fn test_store_picture_requires_picture_album() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        write_test_image(&source, 10, 10);

        let mut db = Database::open(dir.path().join("home")).unwrap();
        db.create_album("Notes", &[], false).unwrap();
        assert!(matches!(
            db.store_picture("Notes", &source),
            Err(StoreError::PicturesDisabled(_))
        ));
    }

    #[test]
    fn test_failed_insert_removes_copied_files() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        write_test_image(&source, 10, 10);

        let mut db = Database::open(dir.path().join("home")).unwrap();
        db.create_album("Stamps", &[MetaItemField::new("Year", FieldType::Integer)], true)
            .unwrap();

        let bad = AlbumItem::new("Stamps").with_field("Year", FieldValue::Text("old".into()));
        let err = db
            .add_item_with_pictures(bad, &[source.clone()], true)
            .unwrap_err();
        assert!(!err.is_dirty());

        let originals = db.home().originals_dir("stamps");
        assert_eq!(fs::read_dir(originals).unwrap().count(), 0);
    }
}
