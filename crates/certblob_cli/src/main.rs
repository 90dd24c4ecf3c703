//! certblob CLI
//!
//! Command-line tools for certificate data kept in Azure Blob Storage.
//!
//! # Commands
//!
//! - `store`, `load`, `delete` - Read and write raw values
//! - `exists`, `stat`, `list` - Inspect keys and virtual directories
//! - `lock`, `unlock`, `lock-status` - Operate the distributed issuance locks
//! - `info` - Describe the configured backend

mod commands;

use certblob_storage::{BlobStorage, Context};
use clap::{Parser, Subcommand};
use commands::config::ConnectionArgs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Certificate storage tools for Azure Blob Storage.
#[derive(Parser)]
#[command(name = "certblob")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Per-command timeout in seconds
    #[arg(global = true, short, long, default_value = "30")]
    timeout: u64,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value (read from a file or stdin)
    Store {
        /// Logical key
        key: String,

        /// Read the value from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Load a value
    Load {
        /// Logical key
        key: String,

        /// Write the value to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a key
    Delete {
        /// Logical key
        key: String,
    },

    /// Check whether a key exists (exit code 1 if not)
    Exists {
        /// Logical key
        key: String,
    },

    /// Show key metadata
    Stat {
        /// Logical key (trailing `/` for a directory)
        key: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List keys under a prefix
    List {
        /// Logical prefix
        #[arg(default_value = "")]
        prefix: String,

        /// Descend into sub-directories
        #[arg(short, long)]
        recursive: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Acquire a lock, hold it, then release it
    Lock {
        /// Logical key
        key: String,

        /// Seconds to hold the lock
        #[arg(long, default_value = "30")]
        hold: u64,
    },

    /// Release a lock held by this host or gone stale
    Unlock {
        /// Logical key
        key: String,
    },

    /// Show the current lock record for a key
    LockStatus {
        /// Logical key
        key: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Describe the configured backend
    Info,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("certblob CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("certblob storage v{}", certblob_storage::VERSION);
        return Ok(());
    }

    let config = cli.connection.load()?;
    let storage = BlobStorage::azure(&config)?;
    debug!(backend = %storage, holder = %storage.holder_id(), "backend ready");

    let timeout = Duration::from_secs(cli.timeout);
    let ctx = Context::background().with_timeout(timeout);
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Store { key, file } => {
            commands::object::store(&storage, &ctx, &key, file.as_deref()).await?;
        }
        Commands::Load { key, output } => {
            commands::object::load(&storage, &ctx, &key, output.as_deref()).await?;
        }
        Commands::Delete { key } => {
            commands::object::delete(&storage, &ctx, &key).await?;
        }
        Commands::Exists { key } => {
            if !commands::object::exists(&storage, &ctx, &key).await? {
                std::process::exit(1);
            }
        }
        Commands::Stat { key, format } => {
            commands::object::stat(&storage, &ctx, &key, &format).await?;
        }
        Commands::List {
            prefix,
            recursive,
            format,
        } => {
            commands::list::run(&storage, &ctx, &prefix, recursive, &format).await?;
        }
        Commands::Lock { key, hold } => {
            let release = Context::background().with_timeout(timeout);
            commands::lock::lock(&storage, &ctx, &release, &key, Duration::from_secs(hold))
                .await?;
        }
        Commands::Unlock { key } => {
            commands::lock::unlock(&storage, &ctx, &key).await?;
        }
        Commands::LockStatus { key, format } => {
            commands::lock::status(&storage, &ctx, &key, config.lock.stale_after, &format)
                .await?;
        }
        Commands::Info => {
            commands::info::run(&storage, &config);
        }
        Commands::Version => {}
    }

    Ok(())
}
