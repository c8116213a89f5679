//! Album data store on top of SQLite.
//!
//! [`Database`] owns the single connection of the process together with the
//! home lock and side files. Album, item and picture operations are spread
//! over the submodules as further `impl Database` blocks.

pub mod albums;
pub mod items;
pub mod pictures;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::home::albums::AlbumOrder;
use crate::home::settings::HomeSettings;
use crate::home::{CollectionHome, HomeLock};

pub use albums::{Album, FieldEdit, MetaItemField};
pub use items::{AlbumItem, ItemField, ResultSet};
pub use pictures::AlbumItemPicture;

pub struct Database {
    conn: Option<Connection>,
    home: CollectionHome,
    settings: HomeSettings,
    album_order: AlbumOrder,
    // Declared last so the lock outlives the connection.
    _lock: HomeLock,
}

impl Database {
    /// Open the collection stored in `home`, creating its layout on first use.
    ///
    /// Fails with [`StoreError::HomeLocked`] when another process holds the home.
    pub fn open(home: impl AsRef<Path>) -> Result<Self> {
        let home = CollectionHome::new(home.as_ref());
        home.ensure_structure()?;
        let lock = HomeLock::acquire(&home)?;

        let conn = open_connection(&home.database_file())?;
        let settings = HomeSettings::load_or_create(&home.settings_file())?;
        let album_order = AlbumOrder::load(&home.albums_file())?;

        let mut db = Self {
            conn: Some(conn),
            home,
            settings,
            album_order,
            _lock: lock,
        };
        db.prune_album_order()?;

        info!("Opened collection at {:?}", db.home.root());
        Ok(db)
    }

    /// Discard the database file and continue against an empty store.
    pub fn open_clean(&mut self) -> Result<()> {
        warn!("Discarding database at {:?}", self.home.database_file());
        self.close()?;

        let db_file = self.home.database_file();
        for path in [
            db_file.clone(),
            db_file.with_extension("db-journal"),
            db_file.with_extension("db-wal"),
            db_file.with_extension("db-shm"),
        ] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        self.conn = Some(open_connection(&db_file)?);
        self.prune_album_order()?;
        Ok(())
    }

    /// Reopen the connection after [`Database::close`] without discarding anything.
    pub fn reopen(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.conn = Some(open_connection(&self.home.database_file())?);
        }
        Ok(())
    }

    /// Release the connection. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            if let Err((conn, e)) = conn.close() {
                self.conn = Some(conn);
                return Err(StoreError::Connection(e.to_string()));
            }
            debug!("Closed connection for {:?}", self.home.root());
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn home(&self) -> &CollectionHome {
        &self.home
    }

    pub fn date_format(&self) -> &str {
        &self.settings.date_format
    }

    pub(crate) fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::Connection("connection is closed".to_string()))
    }

    pub(crate) fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Connection("connection is closed".to_string()))
    }

    /// Run `f` inside a savepoint.
    ///
    /// On error the savepoint is rolled back and the error returned as is.
    /// If the rollback itself fails the error is marked dirty.
    pub(crate) fn with_savepoint<T>(
        &self,
        step: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn()?;
        let name = format!("sp_{}", Uuid::new_v4().simple());
        conn.execute_batch(&format!("SAVEPOINT \"{name}\""))?;

        match f(conn) {
            Ok(value) => {
                if let Err(e) = conn.execute_batch(&format!("RELEASE SAVEPOINT \"{name}\"")) {
                    error!("Could not release savepoint for {}: {}", step, e);
                    return Err(StoreError::from(e).into_dirty(step));
                }
                Ok(value)
            }
            Err(err) => {
                let rollback = format!(
                    "ROLLBACK TO SAVEPOINT \"{name}\"; RELEASE SAVEPOINT \"{name}\""
                );
                match conn.execute_batch(&rollback) {
                    Ok(()) => {
                        debug!("Rolled back {} after: {}", step, err);
                        Err(err)
                    }
                    Err(rollback_err) => {
                        error!("Rollback of {} failed: {} (original error: {})", step, rollback_err, err);
                        Err(err.into_dirty(step))
                    }
                }
            }
        }
    }

    /// Re-read settings and album order after the home was replaced on disk.
    pub(crate) fn reload_side_files(&mut self) -> Result<()> {
        self.settings = HomeSettings::load_or_create(&self.home.settings_file())?;
        self.album_order = AlbumOrder::load(&self.home.albums_file())?;
        self.prune_album_order()
    }

    /// Record that `album` changed. Side file failures only get logged.
    fn note_modified(&mut self, album: &str) {
        if let Err(e) = self.album_order.touch(album) {
            warn!("Could not update last-modified time of '{}': {}", album, e);
        }
    }

    fn prune_album_order(&mut self) -> Result<()> {
        let names: Vec<String> = albums::album_names(self.conn()?)?;
        self.album_order.retain_existing(&names)?;
        for name in &names {
            if self.album_order.position(name).is_none() {
                self.album_order.touch(name)?;
            }
        }
        Ok(())
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| StoreError::Connection(format!("{}: {}", path.display(), e)))?;
    // Album rebuilds drop and recreate referenced tables inside one savepoint.
    conn.pragma_update(None, "foreign_keys", false)
        .map_err(|e| StoreError::Connection(format!("{}: {}", path.display(), e)))?;
    conn.execute_batch(schema::SCHEMA)
        .map_err(|e| StoreError::Connection(format!("{}: {}", path.display(), e)))?;
    Ok(conn)
}
