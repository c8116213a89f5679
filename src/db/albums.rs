//! Album schema manager: catalog, per-album tables and field evolution.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::{FieldType, FieldValue};

use super::schema::{
    self, create_index_sql, create_item_table_sql, create_pictures_table_sql,
    create_typeinfo_table_sql, index_name, pictures_table, quote_column, quote_table,
    typeinfo_table, CONTENT_VERSION_COLUMN, ID_COLUMN, MASTER_TABLE, SCHEMA_VERSION_COLUMN,
    TYPEINFO_COLUMN, TYPEINFO_ROW_ID,
};
use super::Database;

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub name: String,
    pub table_name: String,
    pub has_pictures: bool,
}

/// Schema description of one user field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaItemField {
    pub name: String,
    pub field_type: FieldType,
    pub quicksearchable: bool,
    pub position: usize,
}

impl MetaItemField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            quicksearchable: false,
            position: 0,
        }
    }

    pub fn quicksearchable(mut self) -> Self {
        self.quicksearchable = true;
        self
    }
}

/// One change applied by [`Database::alter_album`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    /// Insert a field at `position`, or append it when `None`.
    Add {
        field: MetaItemField,
        position: Option<usize>,
    },
    Remove(String),
    Rename { from: String, to: String },
    Retype { name: String, field_type: FieldType },
    Move { name: String, position: usize },
    SetQuicksearchable { name: String, quicksearchable: bool },
}

/// Target field plus the column its data is copied from during a rebuild.
#[derive(Debug, Clone)]
struct PlannedField {
    field: MetaItemField,
    source: Option<MetaItemField>,
}

impl Database {
    // ========================================================================
    // Catalog
    // ========================================================================

    pub fn album(&self, name: &str) -> Result<Option<Album>> {
        load_album(self.conn()?, name)
    }

    pub fn album_exists(&self, name: &str) -> Result<bool> {
        Ok(self.album(name)?.is_some())
    }

    /// All albums in the user's order; albums without a position follow alphabetically.
    pub fn list_albums(&self) -> Result<Vec<Album>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT album_name, album_table_name, has_pictures FROM {MASTER_TABLE}"
        ))?;
        let mut albums: Vec<Album> = stmt
            .query_map([], album_from_row)?
            .collect::<rusqlite::Result<_>>()?;

        albums.sort_by(|a, b| {
            let pa = self.album_order.position(&a.name).unwrap_or(usize::MAX);
            let pb = self.album_order.position(&b.name).unwrap_or(usize::MAX);
            pa.cmp(&pb).then_with(|| a.name.cmp(&b.name))
        });
        Ok(albums)
    }

    pub fn is_picture_album(&self, name: &str) -> Result<bool> {
        Ok(require_album(self.conn()?, name)?.has_pictures)
    }

    /// Whether `field` could be added to `album` without clashing.
    pub fn is_item_field_name_available(&self, album: &str, field: &str) -> Result<bool> {
        if schema::validate_field_name(field).is_err() {
            return Ok(false);
        }
        let fields = self.get_field_schema(album)?;
        Ok(!fields.iter().any(|f| f.name.eq_ignore_ascii_case(field)))
    }

    pub fn is_album_quicksearchable(&self, album: &str) -> Result<bool> {
        Ok(self.get_field_schema(album)?.iter().any(|f| f.quicksearchable))
    }

    pub fn album_last_modified(&self, album: &str) -> Option<DateTime<Utc>> {
        self.album_order.last_modified(album)
    }

    /// Move an album to `index` in the user-visible order.
    pub fn move_album(&mut self, name: &str, index: usize) -> Result<bool> {
        self.album_order.move_to(name, index)
    }

    /// Ordered field list of an album, read fresh from its typeinfo table.
    pub fn get_field_schema(&self, album: &str) -> Result<Vec<MetaItemField>> {
        let conn = self.conn()?;
        let album = require_album(conn, album)?;
        read_field_schema(conn, &album.table_name)
    }

    // ========================================================================
    // Structural operations
    // ========================================================================

    pub fn create_album(
        &mut self,
        name: &str,
        fields: &[MetaItemField],
        has_pictures: bool,
    ) -> Result<Album> {
        let table = schema::validate_album_name(name)?;
        schema::validate_fields(name, fields)?;
        let fields = with_positions(fields.to_vec());

        let album = Album {
            name: name.to_string(),
            table_name: table,
            has_pictures,
        };

        let home = &self.home;
        self.with_savepoint("create album", |conn| {
            ensure_name_free(conn, &album.name, &album.table_name)?;

            conn.execute(
                &format!(
                    "INSERT INTO {MASTER_TABLE} (album_name, album_table_name, has_pictures) \
                     VALUES (?1, ?2, ?3)"
                ),
                params![album.name, album.table_name, yes_no(has_pictures)],
            )?;
            write_structure(conn, &album.table_name, &fields)?;

            if has_pictures {
                conn.execute_batch(&create_pictures_table_sql(&album.table_name))?;
                home.ensure_album_dirs(&album.table_name)?;
            }
            Ok(())
        })?;

        info!("Created album '{}' ({} fields)", album.name, fields.len());
        self.note_modified(name);
        Ok(album)
    }

    /// Apply field edits. Column changes rebuild the item table under one savepoint.
    pub fn alter_album(&mut self, name: &str, edits: &[FieldEdit]) -> Result<()> {
        let (album, current) = {
            let conn = self.conn()?;
            let album = require_album(conn, name)?;
            let current = read_field_schema(conn, &album.table_name)?;
            (album, current)
        };

        let plan = plan_edits(name, &current, edits)?;
        let target: Vec<MetaItemField> = plan.iter().map(|p| p.field.clone()).collect();
        schema::validate_fields(name, &target)?;

        let columns_changed = plan.len() != current.len()
            || plan.iter().zip(&current).any(|(p, old)| {
                p.field.name != old.name
                    || p.field.field_type != old.field_type
                    || p.source.as_ref().map(|s| &s.name) != Some(&old.name)
            });

        self.with_savepoint("alter album", |conn| {
            if columns_changed {
                rebuild_tables(conn, &album.table_name, &plan)
            } else {
                rebuild_index(conn, &album.table_name, &target)
            }
        })?;

        info!(
            "Altered album '{}' ({} edits, rebuilt: {})",
            name,
            edits.len(),
            columns_changed
        );
        self.note_modified(name);
        Ok(())
    }

    /// Remove an album with all its tables, its catalog row and picture files.
    pub fn drop_album(&mut self, name: &str) -> Result<()> {
        let album = require_album(self.conn()?, name)?;
        let table = album.table_name.clone();

        self.with_savepoint("drop album", |conn| {
            for t in [pictures_table(&table), table.clone(), typeinfo_table(&table)] {
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_table(&t)))?;
            }
            conn.execute(
                &format!("DELETE FROM {MASTER_TABLE} WHERE album_name = ?1"),
                [name],
            )?;
            Ok(())
        })?;

        if let Err(e) = self.home.remove_album_dir(&table) {
            error!(
                "Album '{}' was removed but its picture directory {:?} was not: {}",
                name,
                self.home.album_dir(&table),
                e
            );
            return Err(e.into_dirty("remove album picture directory"));
        }

        if let Err(e) = self.album_order.remove(name) {
            error!("Could not remove '{}' from album order: {}", name, e);
        }
        info!("Dropped album '{}'", name);
        Ok(())
    }

    /// Rename an album together with its tables, index and picture directory.
    pub fn rename_album(&mut self, old: &str, new: &str) -> Result<Album> {
        let current = require_album(self.conn()?, old)?;
        let new_table = schema::validate_album_name(new)?;

        let renamed = Album {
            name: new.to_string(),
            table_name: new_table,
            has_pictures: current.has_pictures,
        };

        let home = &self.home;
        self.with_savepoint("rename album", |conn| {
            if load_album(conn, new)?.is_some() {
                return Err(StoreError::AlbumExists(new.to_string()));
            }

            let old_table = current.table_name.as_str();
            let new_table = renamed.table_name.as_str();
            if old_table != new_table {
                ensure_tables_free(conn, new, new_table)?;
                let fields = read_field_schema(conn, old_table)?;

                conn.execute_batch(&format!(
                    "DROP INDEX IF EXISTS {}",
                    quote_table(&index_name(old_table))
                ))?;
                let mut pairs = vec![
                    (old_table.to_string(), new_table.to_string()),
                    (typeinfo_table(old_table), typeinfo_table(new_table)),
                ];
                if current.has_pictures {
                    pairs.push((pictures_table(old_table), pictures_table(new_table)));
                }
                for (from, to) in pairs {
                    conn.execute_batch(&format!(
                        "ALTER TABLE {} RENAME TO {}",
                        quote_table(&from),
                        quote_table(&to)
                    ))?;
                }
                if let Some(sql) = create_index_sql(new_table, &fields) {
                    conn.execute_batch(&sql)?;
                }
            }

            conn.execute(
                &format!(
                    "UPDATE {MASTER_TABLE} SET album_name = ?1, album_table_name = ?2 \
                     WHERE album_name = ?3"
                ),
                params![new, new_table, old],
            )?;

            if old_table != new_table {
                home.rename_album_dir(old_table, new_table)?;
            }
            Ok(())
        })?;

        if let Err(e) = self.album_order.rename(old, new) {
            error!("Could not rename '{}' in album order: {}", old, e);
        }
        info!("Renamed album '{}' to '{}'", old, new);
        Ok(renamed)
    }

    /// Turn picture storage on or off. Turning it off deletes the album's pictures.
    pub fn set_album_picture_functionality(&mut self, name: &str, enabled: bool) -> Result<()> {
        let album = require_album(self.conn()?, name)?;
        if album.has_pictures == enabled {
            return Ok(());
        }
        let table = album.table_name.clone();

        let home = &self.home;
        self.with_savepoint("set picture functionality", |conn| {
            if enabled {
                conn.execute_batch(&create_pictures_table_sql(&table))?;
                home.ensure_album_dirs(&table)?;
            } else {
                conn.execute_batch(&format!(
                    "DROP TABLE IF EXISTS {}",
                    quote_table(&pictures_table(&table))
                ))?;
            }
            conn.execute(
                &format!("UPDATE {MASTER_TABLE} SET has_pictures = ?1 WHERE album_name = ?2"),
                params![yes_no(enabled), name],
            )?;
            Ok(())
        })?;

        if !enabled {
            if let Err(e) = self.home.remove_album_dir(&table) {
                error!("Pictures of '{}' were detached but not deleted: {}", name, e);
                return Err(e.into_dirty("remove album picture directory"));
            }
        }

        info!("Pictures for album '{}' enabled: {}", name, enabled);
        self.note_modified(name);
        Ok(())
    }
}

// ============================================================================
// Connection-level helpers shared with the item store
// ============================================================================

pub(crate) fn load_album(conn: &Connection, name: &str) -> Result<Option<Album>> {
    let album = conn
        .query_row(
            &format!(
                "SELECT album_name, album_table_name, has_pictures FROM {MASTER_TABLE} \
                 WHERE album_name = ?1"
            ),
            [name],
            album_from_row,
        )
        .optional()?;
    Ok(album)
}

pub(crate) fn require_album(conn: &Connection, name: &str) -> Result<Album> {
    load_album(conn, name)?.ok_or_else(|| StoreError::AlbumNotFound(name.to_string()))
}

pub(crate) fn album_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT album_name FROM {MASTER_TABLE}"))?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(names)
}

/// Read the field list from the typeinfo table, flags from the quicksearch index.
pub(crate) fn read_field_schema(conn: &Connection, table: &str) -> Result<Vec<MetaItemField>> {
    let typeinfo = typeinfo_table(table);

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns: Vec<String> = stmt
        .query_map([&typeinfo], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    if columns.is_empty() {
        return Err(StoreError::InconsistentSchema {
            table: table.to_string(),
            message: "typeinfo table is missing".to_string(),
        });
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
    let indexed: Vec<String> = stmt
        .query_map([index_name(table)], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let field_columns: Vec<&String> = columns
        .iter()
        .filter(|c| c.as_str() != ID_COLUMN && c.as_str() != SCHEMA_VERSION_COLUMN)
        .collect();
    if field_columns.is_empty() {
        return Ok(Vec::new());
    }

    let select: Vec<String> = field_columns.iter().map(|c| quote_column(c)).collect();
    let types: Vec<Option<String>> = conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE {ID_COLUMN} = ?1",
            select.join(", "),
            quote_table(&typeinfo)
        ),
        [TYPEINFO_ROW_ID],
        |row| {
            (0..field_columns.len())
                .map(|i| row.get::<_, Option<String>>(i))
                .collect()
        },
    )?;

    let mut fields = Vec::new();
    for (column, raw) in field_columns.into_iter().zip(types) {
        let raw = raw.unwrap_or_default();
        let field_type: FieldType = raw.parse().map_err(|message| StoreError::InconsistentSchema {
            table: table.to_string(),
            message,
        })?;
        fields.push(MetaItemField {
            name: column.clone(),
            field_type,
            quicksearchable: indexed.contains(column),
            position: fields.len(),
        });
    }
    Ok(fields)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn album_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Album> {
    let has_pictures: String = row.get(2)?;
    Ok(Album {
        name: row.get(0)?,
        table_name: row.get(1)?,
        has_pictures: has_pictures.eq_ignore_ascii_case("YES"),
    })
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

fn with_positions(mut fields: Vec<MetaItemField>) -> Vec<MetaItemField> {
    for (i, field) in fields.iter_mut().enumerate() {
        field.position = i;
    }
    fields
}

fn ensure_name_free(conn: &Connection, name: &str, table: &str) -> Result<()> {
    if load_album(conn, name)?.is_some() {
        return Err(StoreError::AlbumExists(name.to_string()));
    }
    ensure_tables_free(conn, name, table)
}

/// Reject names whose derived tables collide with anything already stored.
fn ensure_tables_free(conn: &Connection, name: &str, table: &str) -> Result<()> {
    for t in [table.to_string(), typeinfo_table(table), pictures_table(table)] {
        if table_exists(conn, &t)? {
            return Err(StoreError::AlbumExists(name.to_string()));
        }
    }
    Ok(())
}

/// Create typeinfo table, its single row, the item table and the quicksearch index.
fn write_structure(conn: &Connection, table: &str, fields: &[MetaItemField]) -> Result<()> {
    write_typeinfo(conn, table, fields)?;
    conn.execute_batch(&create_item_table_sql(table, &typeinfo_table(table), fields))?;
    if let Some(sql) = create_index_sql(table, fields) {
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

/// Create the typeinfo table holding one row of type names and a fresh schema version.
fn write_typeinfo(conn: &Connection, table: &str, fields: &[MetaItemField]) -> Result<()> {
    let typeinfo = typeinfo_table(table);
    conn.execute_batch(&create_typeinfo_table_sql(&typeinfo, fields))?;

    let mut columns = vec![ID_COLUMN.to_string()];
    columns.extend(fields.iter().map(|f| quote_column(&f.name)));
    columns.push(SCHEMA_VERSION_COLUMN.to_string());

    let type_names: Vec<&str> = fields.iter().map(|f| f.field_type.name()).collect();
    let schema_version = Uuid::new_v4().to_string();
    let mut values: Vec<&dyn ToSql> = vec![&TYPEINFO_ROW_ID];
    values.extend(type_names.iter().map(|n| n as &dyn ToSql));
    values.push(&schema_version);

    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_table(&typeinfo),
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        ),
        values.as_slice(),
    )?;
    Ok(())
}

fn rebuild_index(conn: &Connection, table: &str, fields: &[MetaItemField]) -> Result<()> {
    conn.execute_batch(&format!(
        "DROP INDEX IF EXISTS {}",
        quote_table(&index_name(table))
    ))?;
    if let Some(sql) = create_index_sql(table, fields) {
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

/// Create the new shape, copy every row converting values, drop the old table, swap.
fn rebuild_tables(conn: &Connection, table: &str, plan: &[PlannedField]) -> Result<()> {
    let typeinfo = typeinfo_table(table);
    let staging = format!("{table}_rebuild_{}", Uuid::new_v4().simple());
    let fields: Vec<MetaItemField> = plan.iter().map(|p| p.field.clone()).collect();

    conn.execute_batch(&create_item_table_sql(&staging, &typeinfo, &fields))?;

    let sources: Vec<&MetaItemField> = plan.iter().filter_map(|p| p.source.as_ref()).collect();
    let mut select_columns = vec![
        ID_COLUMN.to_string(),
        CONTENT_VERSION_COLUMN.to_string(),
        TYPEINFO_COLUMN.to_string(),
    ];
    select_columns.extend(sources.iter().map(|f| quote_column(&f.name)));

    let mut insert_columns = vec![ID_COLUMN.to_string()];
    insert_columns.extend(fields.iter().map(|f| quote_column(&f.name)));
    insert_columns.push(CONTENT_VERSION_COLUMN.to_string());
    insert_columns.push(TYPEINFO_COLUMN.to_string());

    let mut select = conn.prepare(&format!(
        "SELECT {} FROM {}",
        select_columns.join(", "),
        quote_table(table)
    ))?;
    let mut insert = conn.prepare(&format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_table(&staging),
        insert_columns.join(", "),
        vec!["?"; insert_columns.len()].join(", ")
    ))?;

    let mut copied = 0usize;
    let mut rows = select.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let content_version: Option<String> = row.get(1)?;
        let typeinfo_ref: Option<i64> = row.get(2)?;

        let mut values = Vec::with_capacity(plan.len());
        let mut source_index = 0;
        for planned in plan {
            let target = planned.field.field_type;
            let value = match &planned.source {
                Some(source) => {
                    let old = FieldValue::from_sql(source.field_type, row.get_ref(3 + source_index)?);
                    source_index += 1;
                    old.convert_to(target)
                        .unwrap_or_else(|| target.default_value())
                }
                None => target.default_value(),
            };
            values.push(value);
        }

        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(values.len() + 3);
        params.push(&id);
        params.extend(values.iter().map(|v| v as &dyn ToSql));
        params.push(&content_version);
        params.push(&typeinfo_ref);
        insert.execute(params.as_slice())?;
        copied += 1;
    }
    drop(rows);
    drop(select);
    drop(insert);

    conn.execute_batch(&format!(
        "DROP TABLE {}; DROP TABLE IF EXISTS {};",
        quote_table(table),
        quote_table(&typeinfo)
    ))?;

    // Recreate typeinfo with the new shape, then move the staged rows into place.
    write_typeinfo(conn, table, &fields)?;
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_table(&staging),
        quote_table(table)
    ))?;
    if let Some(sql) = create_index_sql(table, &fields) {
        conn.execute_batch(&sql)?;
    }

    debug!("Rebuilt '{}' copying {} rows", table, copied);
    Ok(())
}

fn find_field(album: &str, plan: &[PlannedField], name: &str) -> Result<usize> {
    plan.iter()
        .position(|p| p.field.name == name)
        .ok_or_else(|| StoreError::FieldNotFound {
            album: album.to_string(),
            field: name.to_string(),
        })
}

fn plan_edits(
    album: &str,
    current: &[MetaItemField],
    edits: &[FieldEdit],
) -> Result<Vec<PlannedField>> {
    let mut plan: Vec<PlannedField> = current
        .iter()
        .map(|f| PlannedField {
            field: f.clone(),
            source: Some(f.clone()),
        })
        .collect();

    for edit in edits {
        match edit {
            FieldEdit::Add { field, position } => {
                let planned = PlannedField {
                    field: field.clone(),
                    source: None,
                };
                let at = position.unwrap_or(plan.len()).min(plan.len());
                plan.insert(at, planned);
            }
            FieldEdit::Remove(name) => {
                let i = find_field(album, &plan, name)?;
                plan.remove(i);
            }
            FieldEdit::Rename { from, to } => {
                let i = find_field(album, &plan, from)?;
                plan[i].field.name = to.clone();
            }
            FieldEdit::Retype { name, field_type } => {
                let i = find_field(album, &plan, name)?;
                plan[i].field.field_type = *field_type;
            }
            FieldEdit::Move { name, position } => {
                let i = find_field(album, &plan, name)?;
                let planned = plan.remove(i);
                let at = (*position).min(plan.len());
                plan.insert(at, planned);
            }
            FieldEdit::SetQuicksearchable {
                name,
                quicksearchable,
            } => {
                let i = find_field(album, &plan, name)?;
                plan[i].field.quicksearchable = *quicksearchable;
            }
        }
    }

    for (i, planned) in plan.iter_mut().enumerate() {
        planned.field.position = i;
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AlbumItem;
    use tempfile::tempdir;

    fn dvd_fields() -> Vec<MetaItemField> {
        vec![
            MetaItemField::new("Title", FieldType::Text).quicksearchable(),
            MetaItemField::new("Actors", FieldType::Text).quicksearchable(),
            MetaItemField::new("Year", FieldType::Integer),
        ]
    }

    #[test]
    fn test_create_album_and_read_schema() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();

        let album = db.create_album("DVDs", &dvd_fields(), true).unwrap();
        assert_eq!(album.table_name, "dvds");
        assert!(db.is_picture_album("DVDs").unwrap());
        assert!(db.home().originals_dir("dvds").is_dir());

        let fields = db.get_field_schema("DVDs").unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Title", "Actors", "Year"]);
        assert_eq!(fields[2].field_type, FieldType::Integer);
        assert_eq!(fields[2].position, 2);
        assert!(fields[0].quicksearchable);
        assert!(!fields[2].quicksearchable);
        assert!(db.is_album_quicksearchable("DVDs").unwrap());
    }

    #[test]
    fn test_duplicate_and_colliding_names() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album("My Books", &[], false).unwrap();

        assert!(matches!(
            db.create_album("My Books", &[], false),
            Err(StoreError::AlbumExists(_))
        ));
        assert!(matches!(
            db.create_album("my-books", &[], false),
            Err(StoreError::AlbumExists(_))
        ));
        assert!(matches!(
            db.create_album("My Books typeinfo", &[], false),
            Err(StoreError::AlbumExists(_))
        ));
        assert_eq!(db.list_albums().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_create_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        // A stray table occupying the derived pictures table name.
        db.conn()
            .unwrap()
            .execute_batch("CREATE TABLE 'stamps_pictures' (x INTEGER)")
            .unwrap();

        let err = db
            .create_album("Stamps", &[MetaItemField::new("Country", FieldType::Text)], true)
            .unwrap_err();
        assert!(!err.is_dirty());
        assert!(!db.album_exists("Stamps").unwrap());
        assert!(!table_exists(db.conn().unwrap(), "stamps_typeinfo").unwrap());
    }

    #[test]
    fn test_alter_album_converts_values() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album("DVDs", &dvd_fields(), false).unwrap();

        let item = AlbumItem::new("DVDs")
            .with_field("Title", FieldValue::Text("RED".into()))
            .with_field("Actors", FieldValue::Text("Bruce Willis".into()))
            .with_field("Year", FieldValue::Integer(2010));
        let id = db.add_item(&item, true).unwrap();
        let version = db.get_item("DVDs", id).unwrap().unwrap().content_version;

        db.alter_album(
            "DVDs",
            &[
                FieldEdit::Retype {
                    name: "Year".into(),
                    field_type: FieldType::Text,
                },
                FieldEdit::Retype {
                    name: "Title".into(),
                    field_type: FieldType::Integer,
                },
                FieldEdit::Rename {
                    from: "Actors".into(),
                    to: "Cast".into(),
                },
                FieldEdit::Add {
                    field: MetaItemField::new("Seen", FieldType::Option),
                    position: Some(0),
                },
            ],
        )
        .unwrap();

        let names: Vec<_> = db
            .get_field_schema("DVDs")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["Seen", "Title", "Cast", "Year"]);

        let stored = db.get_item("DVDs", id).unwrap().unwrap();
        assert_eq!(stored.value("Year"), Some(&FieldValue::Text("2010".into())));
        assert_eq!(stored.value("Title"), Some(&FieldValue::Integer(0)));
        assert_eq!(stored.value("Cast"), Some(&FieldValue::Text("Bruce Willis".into())));
        assert_eq!(
            stored.value("Seen"),
            Some(&FieldValue::Option(crate::types::OptionType::Unknown))
        );
        assert_eq!(stored.content_version, version);
    }

    #[test]
    fn test_alter_picture_album_keeps_items_and_pictures() {
        let dir = tempdir().unwrap();
        let picture = dir.path().join("cover.png");
        image::RgbImage::new(40, 30).save(&picture).unwrap();

        let mut db = Database::open(dir.path().join("home")).unwrap();
        db.create_album("DVDs", &dvd_fields(), true).unwrap();
        let item = AlbumItem::new("DVDs")
            .with_field("Title", FieldValue::Text("RED".into()))
            .with_field("Year", FieldValue::Integer(2010));
        let id = db.add_item_with_pictures(item, &[picture], true).unwrap();

        db.alter_album(
            "DVDs",
            &[
                FieldEdit::Retype {
                    name: "Year".into(),
                    field_type: FieldType::Text,
                },
                FieldEdit::Remove("Actors".into()),
            ],
        )
        .unwrap();

        let stored = db.get_item("DVDs", id).unwrap().unwrap();
        assert_eq!(stored.value("Year"), Some(&FieldValue::Text("2010".into())));
        assert_eq!(stored.pictures.len(), 1);
        assert!(db.original_picture_path(&stored.pictures[0]).unwrap().is_file());
        assert!(db.thumbnail_picture_path(&stored.pictures[0]).unwrap().is_file());

        // The rebuilt table accepts new rows referencing the new typeinfo.
        let next = AlbumItem::new("DVDs").with_field("Year", FieldValue::Text("soon".into()));
        assert!(db.add_item(&next, true).is_ok());
        assert_eq!(db.item_count("DVDs").unwrap(), 2);
    }

    #[test]
    fn test_failed_alter_restores_previous_schema() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album(
            "Coins",
            &[
                MetaItemField::new("Country", FieldType::Text),
                MetaItemField::new("Year", FieldType::Integer),
            ],
            false,
        )
        .unwrap();
        let item = AlbumItem::new("Coins")
            .with_field("Country", FieldValue::Text("Peru".into()))
            .with_field("Year", FieldValue::Integer(1990));
        let id = db.add_item(&item, true).unwrap();
        let before = db.get_field_schema("Coins").unwrap();

        // Occupies the index name, so the rebuild fails after rows were copied.
        db.conn()
            .unwrap()
            .execute_batch("CREATE TABLE 'coins_index' (x INTEGER)")
            .unwrap();

        let err = db
            .alter_album(
                "Coins",
                &[
                    FieldEdit::Retype {
                        name: "Year".into(),
                        field_type: FieldType::Text,
                    },
                    FieldEdit::SetQuicksearchable {
                        name: "Country".into(),
                        quicksearchable: true,
                    },
                ],
            )
            .unwrap_err();
        assert!(!err.is_dirty());

        assert_eq!(db.get_field_schema("Coins").unwrap(), before);
        let stored = db.get_item("Coins", id).unwrap().unwrap();
        assert_eq!(stored.value("Year"), Some(&FieldValue::Integer(1990)));
        assert_eq!(stored.value("Country"), Some(&FieldValue::Text("Peru".into())));

        let staged: i64 = db
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'coins_rebuild_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(staged, 0);
    }

    #[test]
    fn test_create_album_with_blocked_picture_dir_fails_clean() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        std::fs::write(db.home().album_dir("stamps"), b"stray").unwrap();

        let err = db
            .create_album("Stamps", &[MetaItemField::new("Country", FieldType::Text)], true)
            .unwrap_err();
        assert!(!err.is_dirty());
        assert!(!db.album_exists("Stamps").unwrap());
        assert!(!table_exists(db.conn().unwrap(), "stamps").unwrap());
        assert!(!table_exists(db.conn().unwrap(), "stamps_pictures").unwrap());
    }

    #[test]
    fn test_alter_album_remove_and_quicksearch_only() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album("DVDs", &dvd_fields(), false).unwrap();

        db.alter_album(
            "DVDs",
            &[FieldEdit::SetQuicksearchable {
                name: "Year".into(),
                quicksearchable: true,
            }],
        )
        .unwrap();
        assert!(db.get_field_schema("DVDs").unwrap()[2].quicksearchable);

        db.alter_album("DVDs", &[FieldEdit::Remove("Actors".into())]).unwrap();
        let fields = db.get_field_schema("DVDs").unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields[1].quicksearchable);

        let err = db
            .alter_album("DVDs", &[FieldEdit::Remove("Director".into())])
            .unwrap_err();
        assert!(matches!(err, StoreError::FieldNotFound { .. }));
    }

    #[test]
    fn test_alter_does_not_touch_other_albums() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album("DVDs", &dvd_fields(), false).unwrap();
        db.create_album("Books", &dvd_fields(), false).unwrap();

        let book = AlbumItem::new("Books").with_field("Title", FieldValue::Text("Dune".into()));
        let book_id = db.add_item(&book, true).unwrap();
        let before = db.get_field_schema("Books").unwrap();

        db.alter_album("DVDs", &[FieldEdit::Remove("Title".into())]).unwrap();

        assert_eq!(db.get_field_schema("Books").unwrap(), before);
        let stored = db.get_item("Books", book_id).unwrap().unwrap();
        assert_eq!(stored.value("Title"), Some(&FieldValue::Text("Dune".into())));
    }

    #[test]
    fn test_rename_album_moves_everything() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album("DVDs", &dvd_fields(), true).unwrap();
        let id = db
            .add_item(
                &AlbumItem::new("DVDs").with_field("Title", FieldValue::Text("RED".into())),
                true,
            )
            .unwrap();

        let renamed = db.rename_album("DVDs", "Movies").unwrap();
        assert_eq!(renamed.table_name, "movies");
        assert!(!db.album_exists("DVDs").unwrap());
        assert!(db.home().thumbnails_dir("movies").is_dir());
        assert!(!db.home().album_dir("dvds").exists());
        assert!(db.get_field_schema("Movies").unwrap()[0].quicksearchable);
        assert!(db.get_item("Movies", id).unwrap().is_some());
        assert!(db.album_last_modified("Movies").is_some());
    }

    #[test]
    fn test_drop_album_removes_tables_and_files() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album("DVDs", &dvd_fields(), true).unwrap();

        db.drop_album("DVDs").unwrap();
        assert!(!db.album_exists("DVDs").unwrap());
        let conn = db.conn().unwrap();
        for t in ["dvds", "dvds_typeinfo", "dvds_pictures"] {
            assert!(!table_exists(conn, t).unwrap());
        }
        assert!(!db.home().album_dir("dvds").exists());
        assert!(matches!(
            db.drop_album("DVDs"),
            Err(StoreError::AlbumNotFound(_))
        ));
    }

    #[test]
    fn test_drop_picture_album_with_pictures() {
        let dir = tempdir().unwrap();
        let picture = dir.path().join("stamp.png");
        image::RgbImage::new(20, 20).save(&picture).unwrap();

        let mut db = Database::open(dir.path().join("home")).unwrap();
        db.create_album("Stamps", &[MetaItemField::new("Name", FieldType::Text)], true)
            .unwrap();
        let item = AlbumItem::new("Stamps").with_field("Name", FieldValue::Text("Penny Black".into()));
        db.add_item_with_pictures(item, &[picture], true).unwrap();

        db.drop_album("Stamps").unwrap();
        assert!(!db.album_exists("Stamps").unwrap());
        let conn = db.conn().unwrap();
        for t in ["stamps", "stamps_typeinfo", "stamps_pictures"] {
            assert!(!table_exists(conn, t).unwrap());
        }
        assert!(!db.home().album_dir("stamps").exists());

        // The name is free again.
        db.create_album("Stamps", &[], true).unwrap();
    }

    #[test]
    fn test_picture_functionality_toggle() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        db.create_album("Coins", &[], false).unwrap();

        db.set_album_picture_functionality("Coins", true).unwrap();
        assert!(db.is_picture_album("Coins").unwrap());
        assert!(table_exists(db.conn().unwrap(), "coins_pictures").unwrap());

        db.set_album_picture_functionality("Coins", false).unwrap();
        assert!(!db.is_picture_album("Coins").unwrap());
        assert!(!db.home().album_dir("coins").exists());
    }

    #[test]
    fn test_list_albums_follows_user_order() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        for name in ["Alpha", "Beta", "Gamma"] {
            db.create_album(name, &[], false).unwrap();
        }
        db.move_album("Gamma", 0).unwrap();

        let names: Vec<_> = db.list_albums().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["Gamma", "Alpha", "Beta"]);
        assert!(db.is_item_field_name_available("Alpha", "Title").unwrap());
        assert!(!db.is_item_field_name_available("Alpha", "id").unwrap());
    }
}
