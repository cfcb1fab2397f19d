use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{ArgGroup, Parser};
use sqlx::postgres::PgPoolOptions;

use copy_loader::{CopyLoader, LoadStats, LoaderConfig, Record, TargetTable};

#[derive(Parser, Debug)]
#[command(
    name = "copy_load",
    about = "Bulk load records into a PostgreSQL table with COPY, skipping duplicate keys",
    group(ArgGroup::new("source").required(true).args(["input", "demo"]))
)]
struct Args {
    /// Connection string of the target database.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Target table name.
    #[arg(long, default_value = "example_table")]
    table: String,

    /// Optional schema of the target table.
    #[arg(long)]
    schema: Option<String>,

    /// JSON file holding an array of objects with identical keys.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Generate N `{id, description}` demo records instead of reading a file.
    #[arg(long)]
    demo: Option<u32>,

    /// Create `<table>(id integer primary key, description text)` if it is missing.
    #[arg(long)]
    create_demo_table: bool,

    /// Records per transaction; each batch commits on its own.
    #[arg(long, default_value_t = 100_000, value_parser = clap::value_parser!(u32).range(1..))]
    batch_size: u32,

    /// Maximum database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Print load statistics as JSON.
    #[arg(long)]
    json: bool,
}

fn demo_records(count: u32) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new()
                .with("id", i64::from(i))
                .with("description", format!("record description {i}"))
        })
        .collect()
}

fn read_records(path: &Path) -> Result<Vec<Record>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&raw)?;
    Ok(rows.into_iter().map(Record::from).collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    copy_loader::init_logger();

    let args = Args::parse();
    let target = TargetTable::new(args.table.trim(), args.schema.as_deref());

    let records = match &args.input {
        Some(path) => read_records(path)?,
        None => demo_records(args.demo.unwrap_or(0)),
    };

    if records.is_empty() {
        writeln!(io::stderr(), "error: no records to load")?;
        std::process::exit(1);
    }

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .connect(&args.database_url)
        .await?;

    if args.create_demo_table {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (id integer PRIMARY KEY, description text)",
            target.qualified()?
        );
        sqlx::query(&create).execute(&pool).await?;
        log::info!("ensured demo table {} exists", target);
    }

    let loader = CopyLoader::with_config(pool.clone(), LoaderConfig::from_env());
    let mut stats = LoadStats::default();
    for (index, batch) in records.chunks(args.batch_size as usize).enumerate() {
        let batch_stats = loader.load(batch, &target).await?;
        log::debug!(
            "batch {}: {} inserted, {} skipped",
            index,
            batch_stats.inserted,
            batch_stats.skipped
        );
        stats.merge(batch_stats);
    }

    if args.json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!(
            "Loaded {} records into {}: {} inserted, {} skipped",
            stats.records, target, stats.inserted, stats.skipped
        );
    }

    pool.close().await;
    Ok(())
}
