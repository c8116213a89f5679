//! Album item store: CRUD on typed rows and raw query execution.

use rusqlite::types::{ToSql, Value};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::query;
use crate::types::{FieldType, FieldValue};

use super::albums::{self, Album, MetaItemField};
use super::pictures::{self, AlbumItemPicture};
use super::schema::{
    quote_column, quote_table, CONTENT_VERSION_COLUMN, ID_COLUMN, TYPEINFO_COLUMN,
    TYPEINFO_ROW_ID,
};
use super::Database;

#[derive(Debug, Clone, PartialEq)]
pub struct ItemField {
    pub name: String,
    pub field_type: FieldType,
    pub value: FieldValue,
}

impl ItemField {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            field_type: value.field_type(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlbumItem {
    /// Assigned on insert.
    pub id: Option<i64>,
    pub album: String,
    pub fields: Vec<ItemField>,
    pub pictures: Vec<AlbumItemPicture>,
    pub content_version: Uuid,
}

impl AlbumItem {
    pub fn new(album: impl Into<String>) -> Self {
        Self {
            id: None,
            album: album.into(),
            fields: Vec::new(),
            pictures: Vec::new(),
            content_version: Uuid::new_v4(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.set_field(name, value);
        self
    }

    /// Set a field, replacing an existing value of the same name.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        let field = ItemField::new(name, value);
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn field(&self, name: &str) -> Option<&ItemField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.field(name).map(|f| &f.value)
    }

    pub fn regenerate_content_version(&mut self) {
        self.content_version = Uuid::new_v4();
    }
}

/// Forward-only cursor over the rows of an executed query.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

impl ResultSet {
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    pub fn move_to_next(&mut self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.rows.len() {
            self.cursor = Some(next);
            true
        } else {
            self.cursor = Some(self.rows.len());
            false
        }
    }

    /// Value of the current row at `index`.
    pub fn field_value(&self, index: usize) -> Option<&Value> {
        self.cursor
            .and_then(|c| self.rows.get(c))
            .and_then(|row| row.get(index))
    }
}

impl Database {
    /// Insert an item and its pictures. Returns the new id.
    pub fn add_item(&mut self, item: &AlbumItem, regenerate_content_version: bool) -> Result<i64> {
        let (album, fields) = self.album_with_schema(&item.album)?;
        let values = bind_values(&album, &fields, item)?;
        if !item.pictures.is_empty() && !album.has_pictures {
            return Err(StoreError::PicturesDisabled(album.name));
        }

        let content_version = if regenerate_content_version {
            Uuid::new_v4()
        } else {
            item.content_version
        };

        let id = self.with_savepoint("add item", |conn| {
            let mut columns: Vec<String> = fields.iter().map(|f| quote_column(&f.name)).collect();
            columns.push(CONTENT_VERSION_COLUMN.to_string());
            columns.push(TYPEINFO_COLUMN.to_string());

            let version = content_version.to_string();
            let mut params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
            params.push(&version);
            params.push(&TYPEINFO_ROW_ID);

            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_table(&album.table_name),
                    columns.join(", "),
                    vec!["?"; columns.len()].join(", ")
                ),
                params.as_slice(),
            )?;
            let id = conn.last_insert_rowid();
            pictures::insert_picture_rows(conn, &album.table_name, id, &item.pictures)?;
            Ok(id)
        })?;

        debug!("Added item {} to '{}'", id, album.name);
        self.note_modified(&album.name);
        Ok(id)
    }

    /// Fetch one item. A missing id is `Ok(None)`.
    pub fn get_item(&self, album: &str, id: i64) -> Result<Option<AlbumItem>> {
        let (album, fields) = self.album_with_schema(album)?;
        let conn = self.conn()?;

        let item = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {ID_COLUMN} = ?1",
                    quote_table(&album.table_name)
                ),
                [id],
                |row| item_from_row(row, &album.name, &fields),
            )
            .optional()?;

        match item {
            Some(mut item) => {
                if album.has_pictures {
                    item.pictures =
                        pictures::load_picture_rows(conn, &album.name, &album.table_name, id)?;
                }
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Replace all field values and pictures of a stored item.
    ///
    /// Files of pictures that are no longer attached are deleted afterwards.
    pub fn update_item(&mut self, item: &AlbumItem) -> Result<()> {
        let id = item
            .id
            .ok_or_else(|| StoreError::UnsavedItem(item.album.clone()))?;
        let (album, fields) = self.album_with_schema(&item.album)?;
        let values = bind_values(&album, &fields, item)?;
        if !item.pictures.is_empty() && !album.has_pictures {
            return Err(StoreError::PicturesDisabled(album.name));
        }

        let replaced = self.with_savepoint("update item", |conn| {
            let mut assignments: Vec<String> = fields
                .iter()
                .map(|f| format!("{} = ?", quote_column(&f.name)))
                .collect();
            assignments.push(format!("{CONTENT_VERSION_COLUMN} = ?"));

            let version = item.content_version.to_string();
            let mut params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
            params.push(&version);
            params.push(&id);

            let changed = conn.execute(
                &format!(
                    "UPDATE {} SET {} WHERE {ID_COLUMN} = ?",
                    quote_table(&album.table_name),
                    assignments.join(", ")
                ),
                params.as_slice(),
            )?;
            if changed == 0 {
                return Err(StoreError::ItemNotFound {
                    album: album.name.clone(),
                    id,
                });
            }

            if !album.has_pictures {
                return Ok(Vec::new());
            }
            let old = pictures::load_picture_rows(conn, &album.name, &album.table_name, id)?;
            pictures::delete_picture_rows(conn, &album.table_name, id)?;
            pictures::insert_picture_rows(conn, &album.table_name, id, &item.pictures)?;
            Ok(old)
        })?;

        let dropped: Vec<AlbumItemPicture> = replaced
            .into_iter()
            .filter(|old| {
                !item
                    .pictures
                    .iter()
                    .any(|new| new.original_file_name == old.original_file_name)
            })
            .collect();
        let failed = self.picture_store(&album.table_name).remove(&dropped);
        if !failed.is_empty() {
            warn!(
                "Item {} of '{}' updated, {} old picture files left behind",
                id,
                album.name,
                failed.len()
            );
        }

        self.note_modified(&album.name);
        Ok(())
    }

    /// Delete an item with its picture rows, then its picture files.
    ///
    /// File removal is best effort: the paths that could not be removed are
    /// returned while the item counts as deleted.
    pub fn delete_item(&mut self, item: &AlbumItem) -> Result<Vec<PathBuf>> {
        let id = item
            .id
            .ok_or_else(|| StoreError::UnsavedItem(item.album.clone()))?;
        let album = albums::require_album(self.conn()?, &item.album)?;

        let removed = self.with_savepoint("delete item", |conn| {
            let pictures = if album.has_pictures {
                let pictures =
                    pictures::load_picture_rows(conn, &album.name, &album.table_name, id)?;
                pictures::delete_picture_rows(conn, &album.table_name, id)?;
                pictures
            } else {
                Vec::new()
            };

            let changed = conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {ID_COLUMN} = ?1",
                    quote_table(&album.table_name)
                ),
                [id],
            )?;
            if changed == 0 {
                return Err(StoreError::ItemNotFound {
                    album: album.name.clone(),
                    id,
                });
            }
            Ok(pictures)
        })?;

        let failed = self.picture_store(&album.table_name).remove(&removed);
        self.note_modified(&album.name);
        Ok(failed)
    }

    /// Run a query string as is and buffer its rows behind a cursor.
    pub fn execute_query(&self, query: &str) -> Result<ResultSet> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(query)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let count = columns.len();

        let rows = stmt
            .query_map([], |row| {
                (0..count)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ResultSet {
            columns,
            rows,
            cursor: None,
        })
    }

    /// Run a `SELECT *` style query against `album` and decode typed items.
    pub fn query_items(&self, album: &str, query: &str) -> Result<Vec<AlbumItem>> {
        let (album, fields) = self.album_with_schema(album)?;
        let conn = self.conn()?;

        let mut stmt = conn.prepare(query)?;
        let mut items: Vec<AlbumItem> = stmt
            .query_map([], |row| item_from_row(row, &album.name, &fields))?
            .collect::<rusqlite::Result<_>>()?;

        if album.has_pictures {
            for item in &mut items {
                if let Some(id) = item.id {
                    item.pictures =
                        pictures::load_picture_rows(conn, &album.name, &album.table_name, id)?;
                }
            }
        }
        Ok(items)
    }

    /// Every item of an album, in insertion order.
    pub fn album_items(&self, album: &str) -> Result<Vec<AlbumItem>> {
        let album = albums::require_album(self.conn()?, album)?;
        self.query_items(&album.name, &query::select_all(&album.name))
    }

    pub fn item_count(&self, album: &str) -> Result<i64> {
        let album = albums::require_album(self.conn()?, album)?;
        let count = self
            .conn()?
            .query_row(&query::count_as(&album.name, "item_count"), [], |row| row.get(0))?;
        Ok(count)
    }

    pub(crate) fn album_with_schema(&self, album: &str) -> Result<(Album, Vec<MetaItemField>)> {
        schema_of(self.conn()?, album)
    }
}

fn schema_of(conn: &Connection, album: &str) -> Result<(Album, Vec<MetaItemField>)> {
    let album = albums::require_album(conn, album)?;
    let fields = albums::read_field_schema(conn, &album.table_name)?;
    Ok((album, fields))
}

/// Order the item's values like the schema, filling gaps with defaults.
fn bind_values(album: &Album, fields: &[MetaItemField], item: &AlbumItem) -> Result<Vec<FieldValue>> {
    for field in &item.fields {
        if !fields.iter().any(|f| f.name == field.name) {
            return Err(StoreError::FieldNotFound {
                album: album.name.clone(),
                field: field.name.clone(),
            });
        }
    }

    fields
        .iter()
        .map(|meta| match item.value(&meta.name) {
            Some(value) if value.field_type() == meta.field_type => Ok(value.clone()),
            Some(value) => Err(StoreError::InvalidValue {
                field: meta.name.clone(),
                value: value.to_string(),
                expected: meta.field_type,
            }),
            None => Ok(meta.field_type.default_value()),
        })
        .collect()
}

fn item_from_row(row: &Row<'_>, album: &str, fields: &[MetaItemField]) -> rusqlite::Result<AlbumItem> {
    let id: i64 = row.get(ID_COLUMN)?;
    let version: Option<String> = row.get(CONTENT_VERSION_COLUMN)?;

    let mut item = AlbumItem::new(album);
    item.id = Some(id);
    if let Some(version) = version.and_then(|v| Uuid::parse_str(&v).ok()) {
        item.content_version = version;
    }
    for field in fields {
        let raw = row.get_ref(field.name.as_str())?;
        item.fields
            .push(ItemField::new(field.name.clone(), FieldValue::from_sql(field.field_type, raw)));
    }
    Ok(item)
}
