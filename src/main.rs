//! Recstore CLI - inspect and edit a durable store of JSON records

use clap::{Args, Parser, Subcommand};
use recstore::config::{self, FieldMatch, StoreConfig};
use recstore::{Predicate, RecordStore, SqliteStore};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "recstore")]
#[command(version)]
#[command(about = "Thread-safe record store with predicate queries and automatic expiry")]
#[command(long_about = r#"
Recstore keeps JSON records in a single SQLite table and lets you query
them by predicate. Records matching the configured outdate rule are
swept automatically before each command.

Example usage:
  recstore init --path cache.db --outdate-pointer /status --outdate-equals '"invalid"'
  recstore add '{"user": "alice", "status": "ok"}' '{"user": "bob", "status": "invalid"}'
  recstore list --pointer /user --equals '"alice"'
  recstore exclude
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config; ":memory:" for a throwaway store)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file
    Init {
        /// Database file the config points at
        #[arg(long, default_value = "recstore.db")]
        path: PathBuf,

        /// Minimum seconds between automatic sweeps
        #[arg(long)]
        timing: Option<f64>,

        /// JSON pointer of the outdate rule
        #[arg(long, requires = "outdate_equals")]
        outdate_pointer: Option<String>,

        /// JSON value that marks a record as outdated
        #[arg(long, requires = "outdate_pointer")]
        outdate_equals: Option<String>,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Append records given as JSON documents
    Add {
        #[arg(required = true)]
        records: Vec<String>,
    },

    /// Print records, optionally only those matching a field
    List(MatchArgs),

    /// Remove and print records, all of them when no field is given
    Exclude(MatchArgs),

    /// Print the number of records
    Count,

    /// Print the record table's columns
    Columns,
}

#[derive(Args)]
struct MatchArgs {
    /// JSON pointer to compare, e.g. /user/name
    #[arg(short, long, requires = "equals")]
    pointer: Option<String>,

    /// JSON value the field must equal
    #[arg(short, long, requires = "pointer")]
    equals: Option<String>,
}

impl MatchArgs {
    fn predicate(&self) -> anyhow::Result<Option<Predicate<Value>>> {
        match (&self.pointer, &self.equals) {
            (Some(pointer), Some(equals)) => {
                let rule = FieldMatch::new(pointer.clone(), parse_json(equals)?)?;
                Ok(Some(rule.to_predicate()))
            }
            _ => Ok(None),
        }
    }
}

fn parse_json(text: &str) -> anyhow::Result<Value> {
    serde_json::from_str(text).map_err(|e| anyhow::anyhow!("invalid JSON {:?}: {}", text, e))
}

fn open_store(cli: &Cli) -> anyhow::Result<SqliteStore<Value>> {
    let mut store_config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    if let Some(database) = &cli.database {
        store_config.path = Some(database.clone());
    }
    if store_config.path.is_none() {
        store_config.path = Some(PathBuf::from("recstore.db"));
    }

    let location = store_config.location();
    tracing::debug!("Opening {}", location);
    Ok(SqliteStore::open(location, store_config.one_shot_options()?)?)
}

fn print_records(records: &[Value]) -> anyhow::Result<()> {
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match &cli.command {
        Commands::Init {
            path,
            timing,
            outdate_pointer,
            outdate_equals,
            force,
        } => {
            let outdate = match (outdate_pointer, outdate_equals) {
                (Some(pointer), Some(equals)) => {
                    Some(FieldMatch::new(pointer.clone(), parse_json(equals)?)?)
                }
                _ => None,
            };
            let store_config = StoreConfig {
                path: Some(path.clone()),
                timing_secs: *timing,
                outdate,
            };
            // Reject a bad timing before writing anything
            store_config.options()?;

            let target = cli.config.clone().unwrap_or_else(config::default_config_path);
            config::write_config(&target, &store_config, *force)?;
            tracing::info!("Wrote config to {}", target.display());
        }

        Commands::Add { records } => {
            let values = records
                .iter()
                .map(|text| parse_json(text))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let count = values.len();
            open_store(&cli)?.add(values)?;
            tracing::info!("Added {} record(s)", count);
        }

        Commands::List(args) => {
            let predicate = args.predicate()?;
            let records = open_store(&cli)?.filter(predicate.as_ref())?;
            print_records(&records)?;
        }

        Commands::Exclude(args) => {
            let predicate = args.predicate()?;
            let records = open_store(&cli)?.exclude(predicate.as_ref())?;
            print_records(&records)?;
            tracing::info!("Removed {} record(s)", records.len());
        }

        Commands::Count => {
            println!("{}", open_store(&cli)?.len()?);
        }

        Commands::Columns => {
            println!("{}", open_store(&cli)?.columns()?.join(", "));
        }
    }

    Ok(())
}
