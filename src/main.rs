use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use collectbox::config::Config;
use collectbox::export::{self, ExportFormat};
use collectbox::import::{self, ImportOptions};
use collectbox::logging;
use collectbox::tasks::BackgroundTaskManager;
use collectbox::{
    AlbumItem, Collection, Database, FieldType, FieldValue, MetaItemField, QueryComponent,
    QueryOperator, SavedSearch,
};

struct Cli {
    home: Option<PathBuf>,
    config: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = Cli {
        home: None,
        config: None,
        command: Vec::new(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("collectbox {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--home" | "--config" | "-c" => {
                if i + 1 < args.len() {
                    let path = PathBuf::from(&args[i + 1]);
                    if args[i] == "--home" {
                        cli.home = Some(path);
                    } else {
                        cli.config = Some(path);
                    }
                    i += 1;
                } else {
                    eprintln!("Error: {} requires a path argument", args[i]);
                    std::process::exit(1);
                }
            }
            _ => {
                cli.command = args[i..].to_vec();
                break;
            }
        }
        i += 1;
    }

    if cli.command.is_empty() {
        print_help();
        std::process::exit(1);
    }
    cli
}

fn print_help() {
    println!(
        r#"collectbox - collection manager

USAGE:
    collectbox [OPTIONS] <COMMAND> [ARGS]

OPTIONS:
    --home PATH         Collection home (overrides the config file)
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

COMMANDS:
    albums                              List albums
    create-album NAME [--pictures] FIELD...
                                        FIELD is Name, Name~TYPE, with a trailing *
                                        for quicksearchable fields
    rename-album OLD NEW                Rename an album and its saved searches
    drop-album NAME                     Delete an album with all items and pictures
    fields ALBUM                        Show the fields of an album
    add-item ALBUM [--picture PATH]... FIELD=VALUE...
    search ALBUM TERM...                Quick search over quicksearchable fields
    query ALBUM [--or] [--sort FIELD] [--desc] [--save NAME] FIELD OP VALUE...
                                        OP is an operator name or token (=, like, <=, ...)
    count ALBUM                         Number of items in an album
    saved-searches ALBUM [run NAME]     List or run saved searches
    import ALBUM FILE [--delimiter C] [--picture-column NAME]
                      [--picture-separator C] [--simulate]
    export ALBUM FILE [--format csv|html|json]
    backup FILE                         Write a .tar.gz snapshot of the collection
    restore FILE                        Replace the collection with a snapshot
    autosave                            Write an auto-save into backups/

FIELD TYPES:
    TEXT DECIMAL INTEGER DATE TIME OPTION URL UUID STAR_RATING

ENVIRONMENT:
    COLLECTBOX_LOG      Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/collectbox/config.toml"#
    );
}

fn main() -> Result<()> {
    let cli = parse_args();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    let home = cli.home.clone().unwrap_or_else(|| config.home.clone());
    let collection = Collection::open(&home)
        .with_context(|| format!("Failed to open collection at {}", home.display()))?;
    let collection = Arc::new(Mutex::new(collection));

    let modified = run(&collection, &cli.command, &config)?;

    if modified && config.backup.autosave_on_exit {
        let mut manager = BackgroundTaskManager::new();
        manager.spawn_auto_save(collection.clone(), config.backup.autosave_limit);
        if let Err(e) = finish_tasks(&mut manager, false) {
            eprintln!("Warning: {}", e);
        }
    }
    Ok(())
}

/// Wait for every task of `manager`, failing on the first unsuccessful one.
fn finish_tasks(manager: &mut BackgroundTaskManager, report: bool) -> Result<()> {
    for done in manager.wait_all() {
        if !done.success {
            let state = if done.dirty { " (collection may be inconsistent)" } else { "" };
            bail!("{} failed: {}{}", done.task_type.display_name(), done.message, state);
        }
        if report {
            println!("{}", done.message);
        }
    }
    Ok(())
}

/// Run one command. Returns whether the collection was modified.
fn run(collection: &Arc<Mutex<Collection>>, command: &[String], config: &Config) -> Result<bool> {
    let (name, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("missing command"))?;

    match name.as_str() {
        "albums" => {
            let guard = lock(collection)?;
            for album in guard.db().list_albums()? {
                let count = guard.db().item_count(&album.name)?;
                let pictures = if album.has_pictures { ", pictures" } else { "" };
                println!("{} ({} items{})", album.name, count, pictures);
            }
            Ok(false)
        }
        "create-album" => {
            let (album, rest) = split_album(args)?;
            let has_pictures = rest.iter().any(|a| a == "--pictures");
            let fields = rest
                .iter()
                .filter(|a| *a != "--pictures")
                .map(|definition| parse_field_definition(definition))
                .collect::<Result<Vec<_>>>()?;
            lock(collection)?
                .db_mut()
                .create_album(album, &fields, has_pictures)?;
            println!("Created album '{}'", album);
            Ok(true)
        }
        "rename-album" => {
            let [old, new] = args else {
                bail!("usage: rename-album OLD NEW");
            };
            let album = lock(collection)?.rename_album(old, new)?;
            println!("Renamed '{}' to '{}'", old, album.name);
            Ok(true)
        }
        "drop-album" => {
            let (album, _) = split_album(args)?;
            lock(collection)?.drop_album(album)?;
            println!("Deleted album '{}'", album);
            Ok(true)
        }
        "fields" => {
            let (album, _) = split_album(args)?;
            for field in lock(collection)?.db().get_field_schema(album)? {
                let marker = if field.quicksearchable { " *" } else { "" };
                println!("{}: {}{}", field.name, field.field_type, marker);
            }
            Ok(false)
        }
        "add-item" => {
            let (album, rest) = split_album(args)?;
            let mut guard = lock(collection)?;
            let db = guard.db_mut();
            let (item, pictures) = parse_item(db, album, rest)?;
            let id = db.add_item_with_pictures(item, &pictures, true)?;
            println!("Added item {} to '{}'", id, album);
            Ok(true)
        }
        "search" => {
            let (album, terms) = split_album(args)?;
            let guard = lock(collection)?;
            let items = guard.db().quick_search_items(album, terms)?;
            print_items(guard.db(), &items);
            Ok(false)
        }
        "query" => run_query(collection, args),
        "count" => {
            let (album, _) = split_album(args)?;
            println!("{}", lock(collection)?.db().item_count(album)?);
            Ok(false)
        }
        "saved-searches" => {
            let (album, rest) = split_album(args)?;
            let guard = lock(collection)?;
            match rest {
                [] => {
                    for (index, search) in guard.saved_searches().searches_for(album).iter().enumerate() {
                        println!("{}: {}", index, search.name);
                    }
                }
                [run, search_name] if run == "run" => {
                    let search = guard
                        .saved_searches()
                        .get(album, search_name)
                        .ok_or_else(|| anyhow!("no saved search '{}' in '{}'", search_name, album))?;
                    let query = search.query(guard.db())?;
                    let items = guard.db().query_items(album, &query)?;
                    print_items(guard.db(), &items);
                }
                _ => bail!("usage: saved-searches ALBUM [run NAME]"),
            }
            Ok(false)
        }
        "import" => run_import(collection, args),
        "export" => {
            let [album, file, rest @ ..] = args else {
                bail!("usage: export ALBUM FILE [--format csv|html|json]");
            };
            let path = PathBuf::from(file);
            let format = match rest {
                [] => ExportFormat::from_path(&path)
                    .ok_or_else(|| anyhow!("cannot tell the format of {}, use --format", file))?,
                [flag, value] if flag == "--format" => parse_format(value)?,
                _ => bail!("usage: export ALBUM FILE [--format csv|html|json]"),
            };
            let count = export::export_album(lock(collection)?.db(), album, &path, format)?;
            println!("Exported {} items to {} ({})", count, path.display(), format.name());
            Ok(false)
        }
        "backup" | "restore" => {
            let [file] = args else {
                bail!("usage: {} FILE", name);
            };
            let mut manager = BackgroundTaskManager::new();
            if name == "backup" {
                manager.spawn_backup(collection.clone(), PathBuf::from(file));
            } else {
                manager.spawn_restore(collection.clone(), PathBuf::from(file));
            }
            finish_tasks(&mut manager, true)?;
            // A fresh snapshot right after a restore would only duplicate it.
            Ok(false)
        }
        "autosave" => {
            let mut manager = BackgroundTaskManager::new();
            manager.spawn_auto_save(collection.clone(), config.backup.autosave_limit);
            finish_tasks(&mut manager, true)?;
            Ok(false)
        }
        other => {
            print_help();
            bail!("Unknown command: {}", other);
        }
    }
}

fn run_query(collection: &Arc<Mutex<Collection>>, args: &[String]) -> Result<bool> {
    let (album, rest) = split_album(args)?;
    let mut combine_with_and = true;
    let mut sort_field = None;
    let mut ascending = true;
    let mut save_as = None;
    let mut terms = Vec::new();

    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "--or" => combine_with_and = false,
            "--desc" => ascending = false,
            "--sort" | "--save" => {
                let value = rest
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("{} requires a value", rest[i]))?
                    .clone();
                if rest[i] == "--sort" {
                    sort_field = Some(value);
                } else {
                    save_as = Some(value);
                }
                i += 1;
            }
            _ => terms.push(rest[i].clone()),
        }
        i += 1;
    }

    if terms.len() % 3 != 0 {
        bail!("conditions come in FIELD OP VALUE triples");
    }
    let components = terms
        .chunks(3)
        .map(|c| {
            let operator: QueryOperator = c[1].parse().map_err(|e: String| anyhow!(e))?;
            Ok(QueryComponent::new(c[0].clone(), operator, c[2].clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut search = SavedSearch::new(save_as.clone().unwrap_or_default(), album, components, combine_with_and);
    if let Some(field) = sort_field {
        search = search.sorted_by(field, ascending);
    }

    let mut guard = lock(collection)?;
    let query = search.query(guard.db())?;
    let items = guard.db().query_items(album, &query)?;
    print_items(guard.db(), &items);

    if save_as.is_some() {
        guard.saved_searches_mut().add(search)?;
        println!("Saved search '{}'", save_as.unwrap_or_default());
        return Ok(true);
    }
    Ok(false)
}

fn run_import(collection: &Arc<Mutex<Collection>>, args: &[String]) -> Result<bool> {
    let [album, file, rest @ ..] = args else {
        bail!("usage: import ALBUM FILE [OPTIONS]");
    };
    let mut options = ImportOptions::default();

    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "--simulate" => options.simulate = true,
            flag @ ("--delimiter" | "--picture-column" | "--picture-separator") => {
                let value = rest
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("{} requires a value", flag))?;
                match flag {
                    "--delimiter" => options.delimiter = ascii_byte(value)?,
                    "--picture-separator" => options.picture_separator = single_char(value)?,
                    _ => options.picture_column = Some(value.clone()),
                }
                i += 1;
            }
            other => bail!("Unknown import option: {}", other),
        }
        i += 1;
    }

    let report = import::import_csv(
        lock(collection)?.db_mut(),
        album,
        &PathBuf::from(file),
        &options,
    )?;
    let verb = if report.simulated { "Would import" } else { "Imported" };
    println!("{} {} rows into '{}'", verb, report.imported, album);
    for failure in &report.failures {
        println!("  line {}: {}", failure.line, failure.message);
    }
    Ok(!report.simulated && report.imported > 0)
}

fn lock(collection: &Arc<Mutex<Collection>>) -> Result<MutexGuard<'_, Collection>> {
    collection
        .lock()
        .map_err(|_| anyhow!("collection lock poisoned"))
}

fn split_album(args: &[String]) -> Result<(&str, &[String])> {
    let (album, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("missing album name"))?;
    Ok((album.as_str(), rest))
}

/// `Name`, `Name~TYPE`, either with a trailing `*` for quicksearchable.
fn parse_field_definition(definition: &str) -> Result<MetaItemField> {
    let (definition, quicksearchable) = match definition.strip_suffix('*') {
        Some(stripped) => (stripped, true),
        None => (definition, false),
    };
    let field = match definition.split_once('~') {
        Some((name, type_name)) => {
            let field_type: FieldType = type_name.parse().map_err(|e: String| anyhow!(e))?;
            MetaItemField::new(name, field_type)
        }
        None => MetaItemField::new(definition, FieldType::Text),
    };
    Ok(if quicksearchable { field.quicksearchable() } else { field })
}

fn parse_item(db: &Database, album: &str, args: &[String]) -> Result<(AlbumItem, Vec<PathBuf>)> {
    let schema = db.get_field_schema(album)?;
    let mut item = AlbumItem::new(album);
    let mut pictures = Vec::new();

    let mut i = 0;
    while i < args.len() {
        if args[i] == "--picture" {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--picture requires a path"))?;
            pictures.push(PathBuf::from(path));
            i += 2;
            continue;
        }
        let (name, raw) = args[i]
            .split_once('=')
            .ok_or_else(|| anyhow!("expected FIELD=VALUE, got '{}'", args[i]))?;
        let field = schema
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| anyhow!("album '{}' has no field '{}'", album, name))?;
        let value = FieldValue::parse(field.field_type, raw, db.date_format())
            .ok_or_else(|| anyhow!("'{}' is not a valid {} value", raw, field.field_type))?;
        item.set_field(name, value);
        i += 1;
    }
    Ok((item, pictures))
}

fn parse_format(value: &str) -> Result<ExportFormat> {
    match value.to_lowercase().as_str() {
        "csv" => Ok(ExportFormat::Csv),
        "html" | "htm" => Ok(ExportFormat::Html),
        "json" => Ok(ExportFormat::Json),
        other => bail!("Unknown export format: {}", other),
    }
}

fn single_char(value: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => bail!("expected a single character, got '{}'", value),
    }
}

/// A CSV delimiter: one ASCII character.
fn ascii_byte(value: &str) -> Result<u8> {
    let c = single_char(value)?;
    if !c.is_ascii() {
        bail!("delimiter must be an ASCII character, got '{}'", c);
    }
    Ok(c as u8)
}

fn print_items(db: &Database, items: &[AlbumItem]) {
    for item in items {
        let id = item.id.map(|id| id.to_string()).unwrap_or_default();
        let fields: Vec<String> = item
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.name, f.value.format_with(db.date_format())))
            .collect();
        let pictures = if item.pictures.is_empty() {
            String::new()
        } else {
            format!(" [{} pictures]", item.pictures.len())
        };
        println!("#{} {}{}", id, fields.join(", "), pictures);
    }
    println!("{} items", items.len());
}
