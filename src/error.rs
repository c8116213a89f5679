//! Error type shared by every storage-facing operation.
//!
//! Each failure carries an [`ErrorState`]: `Clean` means the operation left
//! no partial effect behind, `Dirty` means some of its effects may have taken
//! hold and the collection needs attention.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::FieldType;

/// Whether a failed operation left partial effects behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    Clean,
    Dirty,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection home {0} is locked by another process")]
    HomeLocked(PathBuf),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("side file {path}: {message}")]
    SideFile { path: PathBuf, message: String },

    #[error("an album named '{0}' already exists")]
    AlbumExists(String),

    #[error("album '{0}' does not exist")]
    AlbumNotFound(String),

    #[error("invalid album name '{0}'")]
    InvalidAlbumName(String),

    #[error("field '{field}' appears more than once in album '{album}'")]
    DuplicateField { album: String, field: String },

    #[error("invalid field name '{0}'")]
    InvalidFieldName(String),

    #[error("album '{album}' has no field '{field}'. Is this a renamed or deleted field?")]
    FieldNotFound { album: String, field: String },

    #[error("schema of album table '{table}' is inconsistent: {message}")]
    InconsistentSchema { table: String, message: String },

    #[error("album '{album}' has no item with id {id}")]
    ItemNotFound { album: String, id: i64 },

    #[error("item of album '{0}' has not been stored yet")]
    UnsavedItem(String),

    #[error("value '{value}' for field '{field}' is not a valid {expected:?}")]
    InvalidValue {
        field: String,
        value: String,
        expected: FieldType,
    },

    #[error("album '{0}' does not store pictures")]
    PicturesDisabled(String),

    #[error("{step} failed and could not be undone: {source}")]
    Dirty {
        step: String,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub fn state(&self) -> ErrorState {
        match self {
            StoreError::Dirty { .. } => ErrorState::Dirty,
            _ => ErrorState::Clean,
        }
    }

    pub fn side_file(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> StoreError {
        StoreError::SideFile {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == ErrorState::Dirty
    }

    /// Mark this error as having left partial effects behind.
    pub fn into_dirty(self, step: impl Into<String>) -> StoreError {
        match self {
            dirty @ StoreError::Dirty { .. } => dirty,
            other => StoreError::Dirty {
                step: step.into(),
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
