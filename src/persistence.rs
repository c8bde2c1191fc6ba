//! Dump and load of whole servers as pretty JSON.
//!
//! Documents are written as canonical extended JSON so every stored value type survives a round
//! trip. Files are written to a temp file in the destination directory and then persisted over
//! the target.

use bson::{Bson, Document};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

use crate::client::Client;
use crate::errors::DbError;
use crate::store::{CollectionData, DatabaseStore, IndexSpec};

const FORMAT: &str = "docmock";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DumpFile {
    format: String,
    version: u32,
    databases: IndexMap<String, IndexMap<String, CollectionDump>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionDump {
    #[serde(default)]
    created: bool,
    #[serde(default)]
    indexes: Vec<serde_json::Value>,
    #[serde(default)]
    documents: Vec<serde_json::Value>,
}

/// Writes every database of `client` to `path`.
///
/// # Errors
/// `Io` or `Json` when the file cannot be written.
pub fn dump(client: &Client, path: &Path) -> Result<(), DbError> {
    let dbs: Vec<Arc<DatabaseStore>> = client.store().databases().into_iter().map(|(_, db)| db).collect();
    dump_databases(&dbs, path)
}

/// A new client holding the content of the dump at `path`.
///
/// # Errors
/// `Io`, `Json` or `ExtJson` for unreadable files, `OperationFailure` for an unknown format or
/// version, `DuplicateKey` when a collection repeats an `_id`.
pub fn load(path: &Path) -> Result<Client, DbError> {
    let client = Client::new();
    let server = client.store().clone();
    load_into(path, |name| Some(server.database(name)))?;
    Ok(client)
}

pub(crate) fn dump_databases(dbs: &[Arc<DatabaseStore>], path: &Path) -> Result<(), DbError> {
    let mut databases = IndexMap::new();
    for db in dbs {
        let mut collections = IndexMap::new();
        for (name, slot) in db.slots() {
            if !slot.is_created() {
                continue;
            }
            collections.insert(name, slot.read(dump_collection));
        }
        if !collections.is_empty() {
            databases.insert(db.name().to_string(), collections);
        }
    }
    let file = DumpFile { format: FORMAT.into(), version: VERSION, databases };
    let body = serde_json::to_string_pretty(&file)?;
    write_atomic(path, body.as_bytes())?;
    log::info!("dumped {} database(s) to {}", file.databases.len(), path.display());
    Ok(())
}

/// Loads each database of the file into the store `target` returns for its name, replacing that
/// database's content. Databases for which `target` returns `None` are skipped.
pub(crate) fn load_into(path: &Path, target: impl Fn(&str) -> Option<Arc<DatabaseStore>>) -> Result<(), DbError> {
    let text = std::fs::read_to_string(path)?;
    let file: DumpFile = serde_json::from_str(&text)?;
    if file.format != FORMAT || file.version != VERSION {
        return Err(DbError::operation_failure(
            2,
            format!("unsupported dump format {} version {} in {}", file.format, file.version, path.display()),
        ));
    }
    for (db_name, collections) in file.databases {
        let Some(db) = target(&db_name) else {
            log::debug!("skipping database {db_name} from {}", path.display());
            continue;
        };
        db.clear();
        for (coll_name, dump) in collections {
            let data = restore_collection(dump)?;
            db.collection(&coll_name).restore(data);
        }
        log::info!("loaded database {db_name} from {}", path.display());
    }
    Ok(())
}

fn dump_collection(data: &CollectionData) -> CollectionDump {
    CollectionDump {
        created: true,
        indexes: data.indexes.iter().map(|i| Bson::Document(i.describe()).into_canonical_extjson()).collect(),
        documents: data.documents.values().map(|d| Bson::Document(d.clone()).into_canonical_extjson()).collect(),
    }
}

fn restore_collection(dump: CollectionDump) -> Result<CollectionData, DbError> {
    let mut data = CollectionData { force_created: dump.created, ..Default::default() };
    for value in dump.documents {
        data.insert(to_document(value)?)?;
    }
    for value in dump.indexes {
        let desc = to_document(value)?;
        let key = desc.get_document("key").map_err(|_| DbError::InvalidDocument("index without key".into()))?.clone();
        let name = desc.get_str("name").map_err(|_| DbError::InvalidDocument("index without name".into()))?.to_string();
        data.indexes.push(IndexSpec {
            name,
            key,
            unique: desc.get_bool("unique").unwrap_or(false),
            sparse: desc.get_bool("sparse").unwrap_or(false),
        });
    }
    Ok(data)
}

fn to_document(value: serde_json::Value) -> Result<Document, DbError> {
    match Bson::try_from(value)? {
        Bson::Document(d) => Ok(d),
        other => Err(DbError::InvalidDocument(format!("expected a document in dump, got {other}"))),
    }
}

fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
