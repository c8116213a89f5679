use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::db::{AlbumItem, Database, MetaItemField};

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
            ExportFormat::Html => "HTML",
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Html]
            .into_iter()
            .find(|f| f.extension() == ext || (ext == "htm" && *f == ExportFormat::Html))
    }
}

#[derive(Debug, Serialize)]
pub struct ExportedItem {
    pub id: Option<i64>,
    pub content_version: String,
    /// Field name and formatted value, in schema order.
    pub fields: Vec<(String, String)>,
    pub pictures: Vec<ExportedPicture>,
}

#[derive(Debug, Serialize)]
pub struct ExportedPicture {
    pub original: String,
    pub thumbnail: String,
}

#[derive(Debug, Serialize)]
struct ExportedAlbum<'a> {
    album: &'a str,
    fields: Vec<ExportedField<'a>>,
    items: &'a [ExportedItem],
}

#[derive(Debug, Serialize)]
struct ExportedField<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    field_type: &'static str,
    quicksearchable: bool,
}

/// Export every item of `album`. Returns the number of items written.
pub fn export_album(db: &Database, album: &str, output_path: &Path, format: ExportFormat) -> Result<usize> {
    let schema = db
        .get_field_schema(album)
        .with_context(|| format!("Failed to read fields of '{album}'"))?;
    let items = db.album_items(album)?;
    let exported = items
        .iter()
        .map(|item| to_exported(db, &schema, item))
        .collect::<Result<Vec<_>>>()?;

    match format {
        ExportFormat::Json => export_json(album, &schema, &exported, output_path)?,
        ExportFormat::Csv => export_csv(&schema, &exported, output_path)?,
        ExportFormat::Html => export_html(album, &schema, &exported, output_path)?,
    }
    Ok(exported.len())
}

fn to_exported(db: &Database, schema: &[MetaItemField], item: &AlbumItem) -> Result<ExportedItem> {
    let fields = schema
        .iter()
        .map(|field| {
            let value = item
                .value(&field.name)
                .map(|v| v.format_with(db.date_format()))
                .unwrap_or_default();
            (field.name.clone(), value)
        })
        .collect();

    let pictures = item
        .pictures
        .iter()
        .map(|picture| {
            Ok(ExportedPicture {
                original: db.original_picture_path(picture)?.display().to_string(),
                thumbnail: db.thumbnail_picture_path(picture)?.display().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExportedItem {
        id: item.id,
        content_version: item.content_version.to_string(),
        fields,
        pictures,
    })
}

fn export_json(album: &str, schema: &[MetaItemField], items: &[ExportedItem], output_path: &Path) -> Result<()> {
    let document = ExportedAlbum {
        album,
        fields: schema
            .iter()
            .map(|f| ExportedField {
                name: &f.name,
                field_type: f.field_type.name(),
                quicksearchable: f.quicksearchable,
            })
            .collect(),
        items,
    };
    let json = serde_json::to_string_pretty(&document)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Headers carry `Name~TYPE` so the file imports back into the same schema.
fn export_csv(schema: &[MetaItemField], items: &[ExportedItem], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record(
        schema
            .iter()
            .map(|f| format!("{}~{}", f.name, f.field_type.name())),
    )?;

    for item in items {
        wtr.write_record(item.fields.iter().map(|(_, value)| value))?;
    }

    wtr.flush()?;
    Ok(())
}

fn export_html(album: &str, schema: &[MetaItemField], items: &[ExportedItem], output_path: &Path) -> Result<()> {
    let mut html = String::new();

    html.push_str(&format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            margin: 0 auto;
            padding: 20px;
            background: #fafafa;
            color: #222;
        }}
        h1 {{
            border-bottom: 2px solid #3f7fbf;
            padding-bottom: 10px;
        }}
        .stats {{
            margin-bottom: 20px;
            color: #555;
        }}
        table {{
            width: 100%;
            border-collapse: collapse;
        }}
        th, td {{
            padding: 8px;
            text-align: left;
            border-bottom: 1px solid #ddd;
            vertical-align: top;
        }}
        th {{
            background: #3f7fbf;
            color: #fff;
        }}
        td img {{
            max-height: 100px;
            margin-right: 4px;
        }}
    </style>
</head>
<body>
    <h1>{}</h1>
"#,
        html_escape(album),
        html_escape(album)
    ));

    html.push_str(&format!(
        r#"    <div class="stats"><strong>Items:</strong> {}</div>
    <table>
        <tr>
"#,
        items.len()
    ));

    let with_pictures = items.iter().any(|i| !i.pictures.is_empty());
    if with_pictures {
        html.push_str("            <th>Pictures</th>\n");
    }
    for field in schema {
        html.push_str(&format!("            <th>{}</th>\n", html_escape(&field.name)));
    }
    html.push_str("        </tr>\n");

    for item in items {
        html.push_str("        <tr>\n");
        if with_pictures {
            html.push_str("            <td>");
            for picture in &item.pictures {
                html.push_str(&format!(
                    r#"<a href="file://{}"><img src="file://{}" alt=""></a>"#,
                    html_escape(&picture.original),
                    html_escape(&picture.thumbnail)
                ));
            }
            html.push_str("</td>\n");
        }
        for (_, value) in &item.fields {
            html.push_str(&format!("            <td>{}</td>\n", html_escape(value)));
        }
        html.push_str("        </tr>\n");
    }

    html.push_str(
        r#"    </table>
</body>
</html>
"#,
    );

    let mut file = File::create(output_path)?;
    file.write_all(html.as_bytes())?;
    Ok(())
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
