use bson::{Bson, Document};
use clap::{Parser, Subcommand};
use docmock::config::{EngineConfig, StorageConfig};
use docmock::query::{FindOptions, UpdateOptions, parse_sort};
use docmock::{Client, DbError, persistence};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "docmock", version, about = "Query and edit a docmock dump file", long_about = None)]
struct Cli {
    /// Path to a config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Dump file to operate on. Takes precedence over config and environment.
    #[arg(long)]
    dump: Option<PathBuf>,
    /// Database name
    #[arg(long, default_value = "test")]
    db: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Print matching documents, one extended-JSON line each")]
    Find {
        collection: String,
        #[arg(default_value = "{}")]
        filter: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    #[command(about = "Count matching documents")]
    Count {
        collection: String,
        #[arg(default_value = "{}")]
        filter: String,
    },
    #[command(about = "Run a pipeline given as a JSON array of stages")]
    Aggregate { collection: String, pipeline: String },
    #[command(about = "Insert one document or a JSON array of documents")]
    Insert { collection: String, documents: String },
    #[command(about = "Apply an update to matching documents")]
    Update {
        collection: String,
        filter: String,
        update: String,
        #[arg(long)]
        many: bool,
        #[arg(long)]
        upsert: bool,
    },
    #[command(about = "Delete matching documents")]
    Delete {
        collection: String,
        filter: String,
        #[arg(long)]
        many: bool,
    },
    #[command(about = "Distinct values of a field")]
    Distinct {
        collection: String,
        key: String,
        #[arg(default_value = "{}")]
        filter: String,
    },
    #[command(about = "List databases, or collections of --db with --collections")]
    List {
        #[arg(long)]
        collections: bool,
    },
}

fn parse_json(text: &str) -> Result<Bson, DbError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(Bson::try_from(value)?)
}

fn parse_doc(text: &str) -> Result<Document, DbError> {
    match parse_json(text)? {
        Bson::Document(d) => Ok(d),
        other => Err(DbError::InvalidDocument(format!("expected a JSON object, got {other}"))),
    }
}

fn parse_docs(text: &str) -> Result<Vec<Document>, DbError> {
    match parse_json(text)? {
        Bson::Document(d) => Ok(vec![d]),
        Bson::Array(items) => items
            .into_iter()
            .map(|b| match b {
                Bson::Document(d) => Ok(d),
                other => Err(DbError::InvalidDocument(format!("expected a JSON object, got {other}"))),
            })
            .collect(),
        other => Err(DbError::InvalidDocument(format!("expected an object or array, got {other}"))),
    }
}

fn print_doc(doc: Document) {
    println!("{}", Bson::Document(doc).into_relaxed_extjson());
}

fn open(path: &Path) -> Result<Client, DbError> {
    if path.exists() { persistence::load(path) } else { Ok(Client::new()) }
}

fn run(cli: Cli) -> Result<(), DbError> {
    let args = EngineConfig { storage: StorageConfig { dump_path: cli.dump.clone() }, ..Default::default() };
    let cfg = EngineConfig::resolve(cli.config.as_deref(), args)?;
    cfg.init_logging()?;
    cfg.apply_telemetry();
    let dump = cfg
        .storage
        .dump_path
        .clone()
        .ok_or_else(|| DbError::Config("no dump file: pass --dump, set DOCMOCK_DUMP or [storage] dump_path".into()))?;
    let client = open(&dump)?;
    let db = client.database(&cli.db)?;
    let mut dirty = false;

    match cli.command {
        Commands::Find { collection, filter, project, sort, skip, limit } => {
            let options = FindOptions {
                projection: project.as_deref().map(parse_doc).transpose()?,
                sort: sort.as_deref().map(|s| parse_doc(s).and_then(|d| parse_sort(&d))).transpose()?,
                skip,
                limit,
            };
            for doc in db.collection(&collection)?.find_with(parse_doc(&filter)?, options)?.to_vec()? {
                print_doc(doc);
            }
        }
        Commands::Count { collection, filter } => {
            println!("{}", db.collection(&collection)?.count_documents(parse_doc(&filter)?, Default::default())?);
        }
        Commands::Aggregate { collection, pipeline } => {
            let stages = parse_docs(&pipeline)?;
            for doc in db.collection(&collection)?.aggregate(&stages)?.to_vec()? {
                print_doc(doc);
            }
            dirty = stages.iter().any(|s| s.contains_key("$out"));
        }
        Commands::Insert { collection, documents } => {
            let report = db.collection(&collection)?.insert_many(parse_docs(&documents)?, true)?;
            println!("inserted {}", report.inserted_ids.len());
            dirty = true;
        }
        Commands::Update { collection, filter, update, many, upsert } => {
            let coll = db.collection(&collection)?;
            let (filter, update) = (parse_doc(&filter)?, parse_doc(&update)?);
            let options = UpdateOptions { upsert };
            let report =
                if many { coll.update_many(filter, update, options)? } else { coll.update_one(filter, update, options)? };
            println!("matched {} modified {}", report.matched, report.modified);
            if let Some(id) = report.upserted_id {
                println!("upserted {}", id.into_relaxed_extjson());
            }
            dirty = true;
        }
        Commands::Delete { collection, filter, many } => {
            let coll = db.collection(&collection)?;
            let filter = parse_doc(&filter)?;
            let report = if many { coll.delete_many(filter)? } else { coll.delete_one(filter)? };
            println!("deleted {}", report.deleted);
            dirty = true;
        }
        Commands::Distinct { collection, key, filter } => {
            for value in db.collection(&collection)?.distinct(&key, parse_doc(&filter)?)? {
                println!("{}", value.into_relaxed_extjson());
            }
        }
        Commands::List { collections } => {
            let names = if collections { db.list_collection_names() } else { client.list_database_names() };
            for name in names {
                println!("{name}");
            }
        }
    }

    if dirty {
        persistence::dump(&client, &dump)?;
    }
    Ok(())
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
