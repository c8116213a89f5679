//! CSV import into a new or existing album.
//!
//! The header row names the fields, optionally typed as `Name~TYPE`
//! (untyped columns are TEXT). One column may hold picture paths separated
//! by a configurable character; relative paths are resolved against the
//! directory of the CSV file.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::db::schema::{validate_album_name, validate_fields};
use crate::db::{AlbumItem, Database, MetaItemField};
use crate::types::{FieldType, FieldValue};

const TYPE_SEPARATOR: char = '~';

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub delimiter: u8,
    /// Header of the column holding picture paths, if any.
    pub picture_column: Option<String>,
    pub picture_separator: char,
    /// Parse and check every row without touching the collection.
    pub simulate: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            picture_column: None,
            picture_separator: ';',
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// 1-based line number in the CSV file.
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub failures: Vec<RowFailure>,
    pub created_album: bool,
    pub simulated: bool,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Header {
    fields: Vec<MetaItemField>,
    /// CSV column of each field, parallel to `fields`.
    columns: Vec<usize>,
    picture_column: Option<usize>,
    picture_separator: char,
    width: usize,
}

/// Import `path` into `album`, creating the album from the header when it
/// does not exist yet.
///
/// Rows that fail to parse or insert are collected in the report and the
/// import carries on. A dirty store error stops the import.
pub fn import_csv(db: &mut Database, album: &str, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let header_row = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    if header_row.iter().all(|cell| cell.trim().is_empty()) {
        bail!("{} has no header row", path.display());
    }

    let mut header = parse_header(&header_row, options)?;
    let mut report = ImportReport {
        simulated: options.simulate,
        ..ImportReport::default()
    };

    if db.album_exists(album)? {
        bind_to_existing(db, album, &mut header)?;
        if header.picture_column.is_some() && !db.is_picture_album(album)? {
            bail!("Album '{}' does not store pictures", album);
        }
    } else {
        validate_album_name(album)?;
        validate_fields(album, &header.fields)?;
        if !options.simulate {
            db.create_album(album, &header.fields, header.picture_column.is_some())?;
            report.created_album = true;
        }
    }

    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let date_format = db.date_format().to_string();

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                report.failures.push(RowFailure {
                    line,
                    message: e.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let (item, pictures) = match parse_row(album, &header, &record, &base_dir, &date_format) {
            Ok(parsed) => parsed,
            Err(message) => {
                report.failures.push(RowFailure { line, message });
                continue;
            }
        };

        if options.simulate {
            report.imported += 1;
            continue;
        }

        match db.add_item_with_pictures(item, &pictures, true) {
            Ok(_) => report.imported += 1,
            Err(e) if e.is_dirty() => {
                return Err(e).with_context(|| format!("Import stopped at line {line}"));
            }
            Err(e) => report.failures.push(RowFailure {
                line,
                message: e.to_string(),
            }),
        }
    }

    if report.failures.is_empty() {
        info!("Imported {} rows into '{}'", report.imported, album);
    } else {
        warn!(
            "Imported {} rows into '{}', {} rows failed",
            report.imported,
            album,
            report.failures.len()
        );
    }
    Ok(report)
}

fn parse_header(row: &csv::StringRecord, options: &ImportOptions) -> Result<Header> {
    let picture_column = options.picture_column.as_deref();
    let mut header = Header {
        fields: Vec::new(),
        columns: Vec::new(),
        picture_column: None,
        picture_separator: options.picture_separator,
        width: row.len(),
    };

    for (column, cell) in row.iter().enumerate() {
        let cell = cell.trim();
        if picture_column == Some(cell) {
            header.picture_column = Some(column);
            continue;
        }

        let field = match cell.split_once(TYPE_SEPARATOR) {
            None => MetaItemField::new(cell, FieldType::Text),
            Some((name, type_name)) => {
                if type_name.contains(TYPE_SEPARATOR) {
                    bail!("Could not interpret header cell '{}'", cell);
                }
                let field_type: FieldType = type_name
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))
                    .with_context(|| format!("Header cell '{cell}'"))?;
                MetaItemField::new(name.trim(), field_type)
            }
        };
        header.fields.push(field);
        header.columns.push(column);
    }

    if let (Some(name), None) = (picture_column, header.picture_column) {
        bail!("Picture column '{}' is not in the header", name);
    }
    Ok(header)
}

/// Use the album's own field types. Typed header cells must agree with them.
fn bind_to_existing(db: &Database, album: &str, header: &mut Header) -> Result<()> {
    let schema = db.get_field_schema(album)?;
    for field in &mut header.fields {
        let Some(existing) = schema.iter().find(|f| f.name == field.name) else {
            bail!("Album '{}' has no field '{}'", album, field.name);
        };
        if field.field_type != FieldType::Text && field.field_type != existing.field_type {
            bail!(
                "Field '{}' of album '{}' is {}, the header says {}",
                field.name,
                album,
                existing.field_type,
                field.field_type
            );
        }
        field.field_type = existing.field_type;
    }
    Ok(())
}

fn parse_row(
    album: &str,
    header: &Header,
    record: &csv::StringRecord,
    base_dir: &Path,
    date_format: &str,
) -> std::result::Result<(AlbumItem, Vec<PathBuf>), String> {
    if record.len() != header.width {
        return Err(format!(
            "expected {} columns, found {}",
            header.width,
            record.len()
        ));
    }

    let mut item = AlbumItem::new(album);
    for (field, &column) in header.fields.iter().zip(&header.columns) {
        let cell = record.get(column).unwrap_or_default();
        let is_text = matches!(field.field_type, FieldType::Text | FieldType::Url);
        if cell.trim().is_empty() && !is_text {
            continue;
        }
        let value = FieldValue::parse(field.field_type, cell, date_format).ok_or_else(|| {
            format!("cannot read '{}' as {} for field '{}'", cell, field.field_type, field.name)
        })?;
        item.set_field(field.name.clone(), value);
    }

    let mut pictures = Vec::new();
    if let Some(column) = header.picture_column {
        let cell = record.get(column).unwrap_or_default();
        for raw in cell.split(header.picture_separator) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let path = base_dir.join(raw);
            if !path.is_file() {
                return Err(format!("picture '{}' does not exist", path.display()));
            }
            pictures.push(path);
        }
    }
    Ok((item, pictures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptionType;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    const BOOKS: &str = "\
Title,Pages~INTEGER,Published~DATE,Read~OPTION
Guards! Guards!,288,01/11/1989,YES
Mort,not a number,12/11/1987,NO
Small Gods,284,,UNKNOWN
Eric,155,01/01/1990
";

    #[test]
    fn test_import_creates_album_and_reports_bad_rows() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("books.csv");
        fs::write(&csv_path, BOOKS).unwrap();

        let mut db = Database::open(dir.path().join("home")).unwrap();
        let report = import_csv(&mut db, "Books", &csv_path, &ImportOptions::default()).unwrap();

        assert!(report.created_album);
        assert_eq!(report.imported, 2);
        let lines: Vec<u64> = report.failures.iter().map(|f| f.line).collect();
        assert_eq!(lines, [3, 5]);
        assert!(report.failures[0].message.contains("INTEGER"));

        let schema = db.get_field_schema("Books").unwrap();
        let types: Vec<_> = schema.iter().map(|f| f.field_type).collect();
        assert_eq!(
            types,
            [FieldType::Text, FieldType::Integer, FieldType::Date, FieldType::Option]
        );

        let items = db.album_items("Books").unwrap();
        assert_eq!(items[0].value("Pages"), Some(&FieldValue::Integer(288)));
        assert_eq!(
            items[0].value("Published"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(1989, 11, 1).unwrap()))
        );
        assert_eq!(
            items[0].value("Read"),
            Some(&FieldValue::Option(OptionType::Yes))
        );
    }

    #[test]
    fn test_simulation_touches_nothing() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("books.csv");
        fs::write(&csv_path, BOOKS).unwrap();

        let mut db = Database::open(dir.path().join("home")).unwrap();
        let options = ImportOptions {
            simulate: true,
            ..ImportOptions::default()
        };
        let report = import_csv(&mut db, "Books", &csv_path, &options).unwrap();

        assert!(report.simulated);
        assert!(!report.created_album);
        assert_eq!(report.imported, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(!db.album_exists("Books").unwrap());
    }

    #[test]
    fn test_append_to_existing_album() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path().join("home")).unwrap();
        db.create_album(
            "Coins",
            &[
                MetaItemField::new("Country", FieldType::Text),
                MetaItemField::new("Year", FieldType::Integer),
            ],
            false,
        )
        .unwrap();

        let csv_path = dir.path().join("coins.csv");
        fs::write(&csv_path, "Year;Country\n1921;Belgium\n1850;France\n").unwrap();
        let options = ImportOptions {
            delimiter: b';',
            ..ImportOptions::default()
        };
        let report = import_csv(&mut db, "Coins", &csv_path, &options).unwrap();
        assert!(report.is_clean());
        assert!(!report.created_album);
        assert_eq!(db.item_count("Coins").unwrap(), 2);

        fs::write(&csv_path, "Year;Mint\n1921;Brussels\n").unwrap();
        let err = import_csv(&mut db, "Coins", &csv_path, &options).unwrap_err();
        assert!(err.to_string().contains("no field 'Mint'"));
    }

    #[test]
    fn test_picture_column() {
        let dir = tempdir().unwrap();
        image::RgbImage::new(20, 20)
            .save(dir.path().join("front.png"))
            .unwrap();
        image::RgbImage::new(20, 20)
            .save(dir.path().join("back.png"))
            .unwrap();
        let csv_path = dir.path().join("stamps.csv");
        fs::write(
            &csv_path,
            "Name,Images\nPenny Black,front.png|back.png\nInverted Jenny,missing.png\n",
        )
        .unwrap();

        let mut db = Database::open(dir.path().join("home")).unwrap();
        let options = ImportOptions {
            picture_column: Some("Images".into()),
            picture_separator: '|',
            ..ImportOptions::default()
        };
        let report = import_csv(&mut db, "Stamps", &csv_path, &options).unwrap();

        assert_eq!(report.imported, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(db.is_picture_album("Stamps").unwrap());
        let items = db.album_items("Stamps").unwrap();
        assert_eq!(items[0].pictures.len(), 2);
        assert_eq!(db.get_field_schema("Stamps").unwrap().len(), 1);
    }

    #[test]
    fn test_bad_header_type() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("x.csv");
        fs::write(&csv_path, "Title~COLOUR\nx\n").unwrap();

        let mut db = Database::open(dir.path().join("home")).unwrap();
        assert!(import_csv(&mut db, "X", &csv_path, &ImportOptions::default()).is_err());
        assert!(!db.album_exists("X").unwrap());
    }
}
