//! Server binary

use clap::{Parser, Subcommand, ValueEnum};
use featurevote::common::{CacheBackend, Config, StorageBackend};
use featurevote::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "featurevote-server")]
#[command(about = "featurevote HTTP API server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StorageArg {
    Memory,
    Rocksdb,
}

#[derive(Clone, Copy, ValueEnum)]
enum CacheArg {
    Memory,
    Redis,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Config file (defaults to ./featurevote.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// RocksDB directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Vote store backend
        #[arg(long, value_enum)]
        storage: Option<StorageArg>,

        /// Vote count cache backend
        #[arg(long, value_enum)]
        cache: Option<CacheArg>,

        /// Redis URL for the redis cache backend
        #[arg(long)]
        redis_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            db,
            storage,
            cache,
            redis_url,
        } => {
            // File and environment first, flags on top
            let mut config = Config::load_from(config.as_deref())?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(db) = db {
                config.storage.path = db;
            }
            if let Some(storage) = storage {
                config.storage.backend = match storage {
                    StorageArg::Memory => StorageBackend::Memory,
                    StorageArg::Rocksdb => StorageBackend::Rocksdb,
                };
            }
            if let Some(cache) = cache {
                config.cache.backend = match cache {
                    CacheArg::Memory => CacheBackend::Memory,
                    CacheArg::Redis => CacheBackend::Redis,
                };
            }
            if let Some(url) = redis_url {
                config.cache.redis_url = url;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            Server::new(config).serve().await?;
        }
    }

    Ok(())
}
