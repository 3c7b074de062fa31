//! Helios Blob Storage tool
//!
//! Stores, reads and inspects records in a SQL storage area from the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use helios_blob_storage::backends::DriverManager;
use helios_blob_storage::core::{BlobStorage, ConnectionFactory, RetryPolicy};
use helios_blob_storage::{ContentType, StorageArea, StorageAreaOptions};

#[derive(Parser, Debug)]
#[command(name = "helios-blob-storage")]
#[command(about = "SQL blob storage area tool")]
#[command(version)]
struct Cli {
    /// Connection string, URL or ODBC style
    #[arg(short, long, env = "HELIOS_STORAGE_CONNECTION_STRING")]
    connection_string: String,

    /// Retries after the first failed connection attempt
    #[arg(long, env = "HELIOS_STORAGE_MAX_RETRIES", default_value = "10")]
    max_retries: u32,

    /// Seconds between connection attempts
    #[arg(long, env = "HELIOS_STORAGE_RETRY_INTERVAL", default_value = "5")]
    retry_interval: u64,

    /// Serve partial reads on dialects that support them
    #[arg(long, env = "HELIOS_STORAGE_ENABLE_RANGE_READS", default_value = "false")]
    enable_range_reads: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "HELIOS_STORAGE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a payload read from a file or stdin
    Store {
        /// Record identifier, generated when omitted
        #[arg(long)]
        id: Option<String>,

        /// Content type code
        #[arg(long, default_value = "0")]
        content_type: i32,

        /// Input file, stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Read a payload to a file or stdout
    Read {
        id: String,

        /// Byte offset of a partial read
        #[arg(long, requires = "length")]
        offset: Option<u64>,

        /// Byte count of a partial read
        #[arg(long, requires = "offset")]
        length: Option<u64>,

        /// Output file, stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete a record
    Delete { id: String },
    /// Print whether a record exists
    Exists { id: String },
    /// Print the payload size of a record
    Size { id: String },
    /// Print the detected dialect and capabilities
    Info,
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_blob_storage={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn open(cli: &Cli) -> anyhow::Result<StorageArea> {
    let drivers = DriverManager::global_initialization();
    let policy = RetryPolicy::new(cli.max_retries, Duration::from_secs(cli.retry_interval));
    let factory = ConnectionFactory::new(drivers, &cli.connection_string, policy)?;
    info!(connection = %factory.target(), "Opening storage area");

    let options = StorageAreaOptions {
        enable_range_reads: cli.enable_range_reads,
    };
    let area = StorageArea::open(factory, options)
        .await
        .context("Cannot open storage area")?;
    Ok(area)
}

async fn run(area: &StorageArea, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Store {
            id,
            content_type,
            input,
        } => {
            let payload = match input {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Cannot read {}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            let content_type = ContentType::from_code(content_type);
            let id = match id {
                Some(id) => {
                    area.store(&id, content_type, &payload).await?;
                    id
                }
                None => area.store_new(content_type, &payload).await?,
            };
            println!("{}", id);
        }
        Command::Read {
            id,
            offset,
            length,
            output,
        } => {
            let payload = match (offset, length) {
                (Some(offset), Some(length)) => area.read_range(&id, offset, length).await?,
                _ => area.read(&id).await?,
            };
            match output {
                Some(path) => tokio::fs::write(&path, &payload)
                    .await
                    .with_context(|| format!("Cannot write {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&payload).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Delete { id } => {
            area.delete(&id).await?;
        }
        Command::Exists { id } => {
            println!("{}", area.exists(&id).await?);
        }
        Command::Size { id } => {
            println!("{}", area.size(&id).await?);
        }
        Command::Info => {
            println!("dialect: {}", area.dialect());
            println!("bootstrap: {:?}", area.bootstrap_outcome());
            let capabilities: Vec<String> =
                area.capabilities().iter().map(|c| c.to_string()).collect();
            println!("capabilities: {}", capabilities.join(", "));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    init_logging(&cli.log_level);

    let command = std::mem::replace(&mut cli.command, Command::Info);
    let area = open(&cli).await?;
    let result = run(&area, command).await;
    area.close().await?;
    result
}
