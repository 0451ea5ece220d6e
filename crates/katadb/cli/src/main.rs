// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! KataDB CLI Tool
//!
//! Loads a schema and JSON records into an in-memory store, then queries,
//! explains, exports or inspects it. Nothing is persisted except snapshot
//! images written by `export`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use katadb_core::{
    Database, FieldSpec, FieldType, Fields, PredicateOperator, Query, QueryPredicate, SortOrder, StoreConfig, Value,
};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "katadb")]
#[command(about = "KataDB - in-memory MVCC document store")]
#[command(version)]
struct Cli {
    /// Store configuration file (defaults to $KATADB_CONFIG, then built-in defaults)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the initial store contents come from
#[derive(Args)]
struct Source {
    /// Schema file: {"collection": {"field": {"type": "string", "indexed": true}}}
    #[arg(long, short = 's')]
    schema: PathBuf,
    /// Data file: {"collection": [{"_key": "a", "field": ...}]}; records without `_key` get a UUID
    #[arg(long, short = 'd')]
    data: Option<PathBuf>,
}

#[derive(Args)]
struct QueryArgs {
    /// Collection to query
    collection: String,
    /// Predicate such as `status=open`, `price>=10` or `price=10..30` (repeatable)
    #[arg(long = "where", short = 'w')]
    predicates: Vec<String>,
    /// Text search token (repeatable)
    #[arg(long, short = 't')]
    text: Vec<String>,
    /// Sort field, `field` or `field:desc`
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print matching records as JSON lines
    Query {
        #[command(flatten)]
        source: Source,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Print the plan a query would use
    Explain {
        #[command(flatten)]
        source: Source,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Write a snapshot image of the loaded store
    Export {
        #[command(flatten)]
        source: Source,
        /// Output file
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
    /// Restore a snapshot image and print its contents and statistics
    Inspect {
        /// Snapshot image file
        image: PathBuf,
        /// Also print every record
        #[arg(long)]
        records: bool,
    },
    /// Walk through the ticket scenario: commit, conflict, delete
    Demo,
    /// Print the effective configuration as TOML
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StoreConfig::resolve(cli.config).context("loading configuration")?;

    match cli.command {
        Commands::Query { source, query } => handle_query(config, &source, &query),
        Commands::Explain { source, query } => handle_explain(config, &source, &query),
        Commands::Export { source, out } => handle_export(config, &source, &out),
        Commands::Inspect { image, records } => handle_inspect(config, &image, records),
        Commands::Demo => handle_demo(config),
        Commands::Config => {
            print!("{}", config.to_toml_string());
            Ok(())
        }
    }
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Build a store from the schema and data files
fn load(config: StoreConfig, source: &Source) -> anyhow::Result<Database> {
    let db = Database::new(config);

    let schema: BTreeMap<String, BTreeMap<String, FieldSpec>> =
        serde_json::from_value(read_json(&source.schema)?).context("schema file must map collections to field specs")?;
    for (collection, fields) in schema {
        db.define_schema(&collection, fields)?;
    }

    let Some(data_path) = &source.data else {
        return Ok(db);
    };
    let data = read_json(data_path)?;
    let collections = data.as_object().context("data file must be an object keyed by collection")?;

    let mut txn = db.begin();
    let mut loaded = 0;
    for (collection, records) in collections {
        let schema = db.schema(collection)?;
        let records = records
            .as_array()
            .with_context(|| format!("records of {collection} must be an array"))?;
        for raw in records {
            let mut raw = raw.clone();
            let key = raw
                .as_object_mut()
                .and_then(|object| object.remove("_key"))
                .and_then(|key| key.as_str().map(str::to_string));
            let fields = schema.fields_from_json(&raw)?;
            match key {
                Some(key) => db.write(&mut txn, collection, key, fields)?,
                None => {
                    db.insert(&mut txn, collection, fields)?;
                }
            }
            loaded += 1;
        }
    }
    let commit_ts = db.commit(&mut txn)?;
    info!("Loaded {} records at timestamp {}", loaded, commit_ts);
    Ok(db)
}

/// Parse one `--where` clause against the collection schema
fn parse_predicate(db: &Database, collection: &str, clause: &str) -> anyhow::Result<QueryPredicate> {
    const OPERATORS: [&str; 5] = [">=", "<=", "=", ">", "<"];

    let Some((position, op)) = OPERATORS
        .iter()
        .filter_map(|op| clause.find(op).map(|position| (position, *op)))
        .min_by_key(|(position, op)| (*position, std::cmp::Reverse(op.len())))
    else {
        bail!("predicate {clause:?} has no operator");
    };
    let field = clause[..position].trim();
    let raw = clause[position + op.len()..].trim();

    let schema = db.schema(collection)?;
    let typed = |text: &str| -> anyhow::Result<Value> {
        let parsed = serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()));
        let fields = schema.fields_from_json(&json!({ field: parsed }))?;
        fields
            .get(field)
            .cloned()
            .with_context(|| format!("predicate {clause:?} has no value"))
    };

    let operator = match op {
        "=" => match raw.split_once("..") {
            Some((low, high)) => PredicateOperator::Between(typed(low)?, typed(high)?),
            None => PredicateOperator::Eq(typed(raw)?),
        },
        ">=" => PredicateOperator::Ge(typed(raw)?),
        "<=" => PredicateOperator::Le(typed(raw)?),
        ">" => PredicateOperator::Gt(typed(raw)?),
        _ => PredicateOperator::Lt(typed(raw)?),
    };
    Ok(QueryPredicate::new(field, operator))
}

fn build_query(db: &Database, args: &QueryArgs) -> anyhow::Result<Query> {
    let mut query = Query::new(&args.collection).text(args.text.iter().cloned()).offset(args.offset);
    for clause in &args.predicates {
        query = query.filter(parse_predicate(db, &args.collection, clause)?);
    }
    if let Some(sort) = &args.sort {
        query = match sort.split_once(':') {
            Some((field, "desc")) => query.sort_by(field, SortOrder::Descending),
            Some((field, "asc")) => query.sort_by(field, SortOrder::Ascending),
            Some((_, other)) => bail!("unknown sort direction {other:?}, expected asc or desc"),
            None => query.sort_by(sort, SortOrder::Ascending),
        };
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

fn handle_query(config: StoreConfig, source: &Source, args: &QueryArgs) -> anyhow::Result<()> {
    let db = load(config, source)?;
    let query = build_query(&db, args)?;

    let txn = db.begin();
    let hits = db.search(&txn, &query)?;
    for hit in &hits {
        let mut json = hit.record.to_json();
        if !query.text.is_empty() {
            json["_score"] = json!(hit.score);
        }
        println!("{json}");
    }
    info!("Query on {} returned {} records", query.collection, hits.len());
    Ok(())
}

fn handle_explain(config: StoreConfig, source: &Source, args: &QueryArgs) -> anyhow::Result<()> {
    let db = load(config, source)?;
    let plan = db.explain(&build_query(&db, args)?)?;
    print!("{plan}");
    Ok(())
}

fn handle_export(config: StoreConfig, source: &Source, out: &Path) -> anyhow::Result<()> {
    let db = load(config, source)?;
    let txn = db.begin();
    let bytes = db.export_snapshot(&txn)?;
    std::fs::write(out, &bytes).with_context(|| format!("writing {}", out.display()))?;
    println!("Snapshot written to {} ({} bytes)", out.display(), bytes.len());
    Ok(())
}

fn handle_inspect(config: StoreConfig, image: &Path, records: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let db = Database::restore(config, &bytes)?;
    db.verify()?;

    let stats = db.statistics();
    println!("snapshot timestamp: {}", stats.last_commit_ts);
    for (name, collection) in &stats.collections {
        println!("collection {name}: {} live keys", collection.mvcc.live_keys);
        for index in &collection.indexes {
            println!(
                "  {} index on {}: {} entries, {} distinct keys",
                index.index_type, index.field, index.entry_count, index.distinct_keys
            );
        }
    }

    if records {
        let txn = db.begin();
        for name in db.collections() {
            for record in db.query(&txn, &Query::new(&name))? {
                println!("{name} {}", record.to_json());
            }
        }
    }
    Ok(())
}

fn handle_demo(config: StoreConfig) -> anyhow::Result<()> {
    println!("=== KataDB ticket scenario ===");
    let db = Database::new(config);
    db.define_schema(
        "tickets",
        [
            ("status".to_string(), FieldSpec::new(FieldType::String).indexed()),
            ("body".to_string(), FieldSpec::new(FieldType::Text).text_indexed()),
        ],
    )?;
    let open = || Value::from("open");

    println!("\n1. T1 writes ticket \"a\" while T2 is already running...");
    let mut t1 = db.begin();
    let mut t2 = db.begin();
    let ticket = Fields::from([
        ("status".to_string(), open()),
        ("body".to_string(), Value::text("hello world")),
    ]);
    db.write(&mut t1, "tickets", "a", ticket)?;
    let ts = db.commit(&mut t1)?;
    println!("   T1 committed at {ts}");
    println!("   status=open -> {:?}", db.range_query("tickets", "status", &open(), &open())?);
    let hits: Vec<String> = db.text_search("tickets", &["hello"])?.into_iter().map(|h| h.key).collect();
    println!("   text \"hello\" -> {hits:?}");

    println!("\n2. T2 updates the same ticket from its older snapshot...");
    db.write(&mut t2, "tickets", "a", Fields::from([("status".to_string(), Value::from("closed"))]))?;
    match db.commit(&mut t2) {
        Err(e) if e.is_retryable() => println!("   T2 rejected: {e}"),
        Err(e) => return Err(e.into()),
        Ok(ts) => bail!("T2 unexpectedly committed at {ts}"),
    }
    let reader = db.begin();
    let status = db.read(&reader, "tickets", "a")?.and_then(|r| r.get("status").cloned());
    println!("   status of \"a\" is still {status:?}");
    drop(reader);

    println!("\n3. T3 deletes the ticket...");
    let mut t3 = db.begin();
    db.delete(&mut t3, "tickets", "a")?;
    db.commit(&mut t3)?;
    let reader = db.begin();
    println!("   read \"a\" -> {:?}", db.read(&reader, "tickets", "a")?);
    println!("   status=open -> {:?}", db.range_query("tickets", "status", &open(), &open())?);
    drop(reader);

    db.verify()?;
    let stats = db.statistics();
    println!(
        "\nDone: {} commits, {} conflicts, {} versions retained",
        stats.transactions.committed, stats.occ.conflicts, stats.retained_versions
    );
    Ok(())
}
