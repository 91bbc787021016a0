//! Server assembly: backends from config, router, listener

use std::sync::Arc;

use crate::cache::{CountCache, MemoryCountCache};
use crate::common::auth::TokenService;
use crate::common::{
    CacheBackend, Config, MetricsRegistry, Result, Retry, RetryPolicy, StorageBackend,
};
use crate::coordinator::accounts::Accounts;
use crate::coordinator::http::{create_router, AppState};
use crate::coordinator::registry::FeatureRegistry;
use crate::coordinator::votes::VoteCoordinator;
use crate::store::{FeatureStore, MemoryStore, RocksStore, UserStore, VoteStore};

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Open the configured store and cache and wire the services together
    pub async fn build_state(&self) -> Result<AppState> {
        let metrics = Arc::new(MetricsRegistry::new());
        let cache = open_cache(&self.config).await?;

        let state = match self.config.storage.backend {
            StorageBackend::Memory => {
                tracing::warn!("using in-memory storage, votes are lost on restart");
                assemble(Arc::new(MemoryStore::new()), cache, &self.config, metrics)
            }
            StorageBackend::Rocksdb => {
                let store =
                    RocksStore::open(&self.config.storage.path, self.config.storage.lock_timeout_ms)?;
                assemble(Arc::new(store), cache, &self.config, metrics)
            }
        };
        Ok(state)
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting featurevote {}", crate::VERSION);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Storage: {:?} ({})", self.config.storage.backend, self.config.storage.path.display());
        tracing::info!("  Cache: {:?} (ttl {}s)", self.config.cache.backend, self.config.cache.ttl_secs);

        let state = self.build_state().await?;
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("featurevote ready");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("featurevote stopped");
        Ok(())
    }
}

fn assemble<S>(
    store: Arc<S>,
    cache: Arc<dyn CountCache>,
    config: &Config,
    metrics: Arc<MetricsRegistry>,
) -> AppState
where
    S: VoteStore + FeatureStore + UserStore + 'static,
{
    let policy = RetryPolicy::from(&config.retry);
    let votes: Arc<dyn VoteStore> = Arc::new(Retry::new(store.clone(), policy));
    let cache: Arc<dyn CountCache> = Arc::new(Retry::new(cache, policy));

    let coordinator = Arc::new(VoteCoordinator::new(
        votes,
        cache,
        config.cache.ttl(),
        metrics.clone(),
    ));
    let tokens = Arc::new(TokenService::new(&config.auth));

    AppState {
        registry: Arc::new(FeatureRegistry::new(store.clone(), store.clone(), coordinator)),
        accounts: Arc::new(Accounts::new(store, tokens)),
        metrics,
    }
}

async fn open_cache(config: &Config) -> Result<Arc<dyn CountCache>> {
    match config.cache.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryCountCache::new())),
        #[cfg(feature = "redis-cache")]
        CacheBackend::Redis => {
            let cache = crate::cache::RedisCountCache::connect(&config.cache.redis_url).await?;
            Ok(Arc::new(cache))
        }
        #[cfg(not(feature = "redis-cache"))]
        CacheBackend::Redis => Err(crate::common::Error::InvalidConfig(
            "cache.backend = \"redis\" requires the redis-cache feature".into(),
        )),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }
}
