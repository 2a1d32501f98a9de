use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ephemeral_store::{
    EntryReader, EntryWriter, ExpiryPolicy, ReloadPolicy, Store, StoreConfig, TableAdmin,
};
use serde_json::Value;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Backing file. Defaults to EPHEMERAL_STORE_PATH, then storage.json.
    #[arg(short, long)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct Expiry {
    /// Keep the entry for 30 days.
    #[arg(long)]
    long_live: bool,
    /// Keep the entry for 1 minute.
    #[arg(long)]
    short_live: bool,
}

#[derive(Subcommand, Clone)]
enum Commands {
    Tables,
    Get { table: String, key: String },
    All { table: String },
    Find { table: String, field: String, value: String },
    Set {
        table: String,
        key: String,
        value: String,
        #[command(flatten)]
        expiry: Expiry,
    },
    Update {
        table: String,
        key: String,
        value: String,
        #[command(flatten)]
        expiry: Expiry,
    },
    Del { table: String, key: String },
    Clear { table: Option<String> },
}

fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = StoreConfig::from_env()
        .with_reload_policy(ReloadPolicy::Never)
        .with_cache(0, std::time::Duration::ZERO);
    if let Some(file) = cli.file {
        config = config.with_path(file);
    }
    let store = Store::open(config)?;

    match cli.command {
        Commands::Tables => {
            let names = store.table_names().await?;
            println!("{}", serde_json::to_string_pretty(&names)?);
        }
        Commands::Get { table, key } => match store.get(&key, &table).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => println!("null"),
        },
        Commands::All { table } => {
            let entries = store.get_all(&table).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Find { table, field, value } => {
            let entry = store.get_by_predicate(&field, &parse_value(value), &table).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Set { table, key, value, expiry } => {
            let policy = ExpiryPolicy::from_flags(expiry.long_live, expiry.short_live)?;
            let entry = store.set(&key, parse_value(value), &table, policy).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Update { table, key, value, expiry } => {
            let policy = ExpiryPolicy::from_flags(expiry.long_live, expiry.short_live)?;
            let entry = store.update(&key, parse_value(value), &table, policy).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Del { table, key } => {
            store.delete(&key, &table).await?;
            println!("OK");
        }
        Commands::Clear { table } => {
            store.clear(table.as_deref()).await?;
            println!("OK");
        }
    }

    store.shutdown().await?;
    Ok(())
}
