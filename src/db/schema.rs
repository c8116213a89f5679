//! Catalog DDL and the naming rules for per-album tables.

use crate::error::{Result, StoreError};
use crate::types::FieldType;

use super::albums::MetaItemField;

pub const MASTER_TABLE: &str = "album_master_table";

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS album_master_table (
    id INTEGER PRIMARY KEY,
    album_name TEXT NOT NULL UNIQUE,
    album_table_name TEXT NOT NULL UNIQUE,
    has_pictures TEXT NOT NULL DEFAULT 'NO'
);
"#;

pub const ID_COLUMN: &str = "id";
pub const CONTENT_VERSION_COLUMN: &str = "content_version";
pub const TYPEINFO_COLUMN: &str = "typeinfo";
pub const SCHEMA_VERSION_COLUMN: &str = "schema_version";

pub const ORIGINAL_FILENAME_COLUMN: &str = "original_picture_filename";
pub const THUMBNAIL_FILENAME_COLUMN: &str = "thumbnail_picture_filename";
pub const ITEM_FOREIGN_KEY_COLUMN: &str = "album_item_foreign_key";

/// Row id of the single typeinfo row every item points at.
pub const TYPEINFO_ROW_ID: i64 = 1;

const RESERVED_COLUMNS: [&str; 4] = [
    ID_COLUMN,
    CONTENT_VERSION_COLUMN,
    TYPEINFO_COLUMN,
    SCHEMA_VERSION_COLUMN,
];

/// Storage table name for an album: lowercase ASCII alphanumerics, everything else `_`.
pub fn table_name_for(album_name: &str) -> String {
    album_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn typeinfo_table(table: &str) -> String {
    format!("{table}_typeinfo")
}

pub fn pictures_table(table: &str) -> String {
    format!("{table}_pictures")
}

pub fn index_name(table: &str) -> String {
    format!("{table}_index")
}

/// Quote a derived table name. Derived names only contain `[a-z0-9_]`.
pub fn quote_table(table: &str) -> String {
    format!("'{table}'")
}

pub fn quote_column(column: &str) -> String {
    format!("[{column}]")
}

/// Double single quotes so a value can be inlined between quotes.
pub fn escape_value(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn is_reserved_column(name: &str) -> bool {
    RESERVED_COLUMNS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

pub fn validate_album_name(name: &str) -> Result<String> {
    let table = table_name_for(name);
    let has_alphanumeric = table.chars().any(|c| c.is_ascii_alphanumeric());
    if !has_alphanumeric || table.starts_with("sqlite_") || table == MASTER_TABLE {
        return Err(StoreError::InvalidAlbumName(name.to_string()));
    }
    Ok(table)
}

pub fn validate_field_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.trim() != name
        || name.contains(['[', ']', '\''])
        || is_reserved_column(name);
    if invalid {
        return Err(StoreError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

/// Check user fields: valid names, no duplicates, no user-defined ID columns.
pub fn validate_fields(album: &str, fields: &[MetaItemField]) -> Result<()> {
    for (i, field) in fields.iter().enumerate() {
        validate_field_name(&field.name)?;
        if field.field_type == FieldType::Id {
            return Err(StoreError::InvalidFieldName(field.name.clone()));
        }
        let duplicate = fields[..i]
            .iter()
            .any(|other| other.name.eq_ignore_ascii_case(&field.name));
        if duplicate {
            return Err(StoreError::DuplicateField {
                album: album.to_string(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

pub fn create_item_table_sql(table: &str, typeinfo: &str, fields: &[MetaItemField]) -> String {
    let mut columns = vec![format!("{ID_COLUMN} INTEGER PRIMARY KEY")];
    columns.extend(fields.iter().map(|f| {
        format!(
            "{} {}",
            quote_column(&f.name),
            f.field_type.storage_kind().sql_type()
        )
    }));
    columns.push(format!("{CONTENT_VERSION_COLUMN} TEXT"));
    columns.push(format!("{TYPEINFO_COLUMN} INTEGER"));
    columns.push(format!(
        "FOREIGN KEY({TYPEINFO_COLUMN}) REFERENCES {}({ID_COLUMN})",
        quote_table(typeinfo)
    ));
    format!("CREATE TABLE {} ({})", quote_table(table), columns.join(", "))
}

pub fn create_typeinfo_table_sql(typeinfo: &str, fields: &[MetaItemField]) -> String {
    let mut columns = vec![format!("{ID_COLUMN} INTEGER PRIMARY KEY")];
    columns.extend(fields.iter().map(|f| format!("{} TEXT", quote_column(&f.name))));
    columns.push(format!("{SCHEMA_VERSION_COLUMN} TEXT"));
    format!("CREATE TABLE {} ({})", quote_table(typeinfo), columns.join(", "))
}

pub fn create_pictures_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {} ({ID_COLUMN} INTEGER PRIMARY KEY, \
         {ORIGINAL_FILENAME_COLUMN} TEXT NOT NULL, \
         {THUMBNAIL_FILENAME_COLUMN} TEXT NOT NULL, \
         {ITEM_FOREIGN_KEY_COLUMN} INTEGER NOT NULL, \
         FOREIGN KEY({ITEM_FOREIGN_KEY_COLUMN}) REFERENCES {}({ID_COLUMN}))",
        quote_table(&pictures_table(table)),
        quote_table(table)
    )
}

/// Index over the quicksearchable columns, `None` when no field is quicksearchable.
pub fn create_index_sql(table: &str, fields: &[MetaItemField]) -> Option<String> {
    let columns: Vec<String> = fields
        .iter()
        .filter(|f| f.quicksearchable)
        .map(|f| quote_column(&f.name))
        .collect();
    if columns.is_empty() {
        return None;
    }
    Some(format!(
        "CREATE INDEX {} ON {} ({})",
        quote_table(&index_name(table)),
        quote_table(table),
        columns.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_derivation() {
        assert_eq!(table_name_for("DVDs"), "dvds");
        assert_eq!(table_name_for("My Books"), "my_books");
        assert_eq!(table_name_for("Rock'n'Roll!"), "rock_n_roll_");
    }

    #[test]
    fn test_album_name_validation() {
        assert!(validate_album_name("Stamps").is_ok());
        assert!(validate_album_name("   ").is_err());
        assert!(validate_album_name("!!!").is_err());
        assert!(validate_album_name("sqlite stat1").is_err());
        assert!(validate_album_name("Album Master Table").is_err());
    }

    #[test]
    fn test_field_name_validation() {
        assert!(validate_field_name("Release Year").is_ok());
        assert!(validate_field_name("ID").is_err());
        assert!(validate_field_name("content_version").is_err());
        assert!(validate_field_name("a]b").is_err());
        assert!(validate_field_name(" padded").is_err());
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let fields = vec![
            MetaItemField::new("Title", FieldType::Text),
            MetaItemField::new("title", FieldType::Integer),
        ];
        assert!(matches!(
            validate_fields("Books", &fields),
            Err(StoreError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_item_table_ddl() {
        let fields = vec![
            MetaItemField::new("Title", FieldType::Text),
            MetaItemField::new("Rating", FieldType::StarRating).quicksearchable(),
        ];
        let sql = create_item_table_sql("dvds", "dvds_typeinfo", &fields);
        assert_eq!(
            sql,
            "CREATE TABLE 'dvds' (id INTEGER PRIMARY KEY, [Title] TEXT, [Rating] INTEGER, \
             content_version TEXT, typeinfo INTEGER, \
             FOREIGN KEY(typeinfo) REFERENCES 'dvds_typeinfo'(id))"
        );
        assert_eq!(
            create_index_sql("dvds", &fields).as_deref(),
            Some("CREATE INDEX 'dvds_index' ON 'dvds' ([Rating])")
        );
        assert_eq!(create_index_sql("dvds", &fields[..1]), None);
    }
}
