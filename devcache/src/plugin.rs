//! Lifecycle of the conditional cache for one dev server run.
//!
//! ```no_run
//! # async fn run(server: std::sync::Arc<devcache::FsDevServer>) -> Result<(), devcache::DevCacheError> {
//! use devcache::{DevCache, DevCacheConfig};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(DevCache::new(DevCacheConfig::default(), server).await?);
//! cache.on_server_start().await?;
//! let layer = cache.layer();
//! // ... serve requests through `layer` ...
//! cache.on_build_end().await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    error::DevCacheError,
    middleware::{ConditionalCacheLayer, SharedIndex},
    server::DevServer,
    warmup::{WarmupHandle, WarmupWorker, spawn_warmup_worker},
};
use devcache_config::DevCacheConfig;
use devcache_index::{CacheIndex, IndexStore, JsonFileStore};
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Owns the index, its store and the warm-up worker for one server lifetime.
pub struct DevCache<D: DevServer> {
    config: DevCacheConfig,
    server: Arc<D>,
    store: Arc<dyn IndexStore>,
    index: SharedIndex,
    warmup: WarmupHandle,
    worker: Mutex<Option<WarmupWorker>>,
    interrupt_armed: AtomicBool,
}

impl<D: DevServer> DevCache<D> {
    /// Cache backed by the JSON file from `config`. The cache directory and
    /// an empty `{}` file are created if missing.
    pub async fn new(
        config: DevCacheConfig,
        server: Arc<D>,
    ) -> Result<Self, DevCacheError> {
        let store = JsonFileStore::new(config.cache_file_path());
        Self::with_store(config, server, Arc::new(store)).await
    }

    pub async fn with_store(
        config: DevCacheConfig,
        server: Arc<D>,
        store: Arc<dyn IndexStore>,
    ) -> Result<Self, DevCacheError> {
        config.validate()?;
        store.ensure().await?;

        let (warmup, worker) =
            spawn_warmup_worker(server.clone(), config.warmup_queue);
        Ok(Self {
            config,
            server,
            store,
            index: Arc::new(RwLock::new(CacheIndex::new())),
            warmup,
            worker: Mutex::new(Some(worker)),
            interrupt_armed: AtomicBool::new(false),
        })
    }

    /// Middleware layer sharing this cache's index and warm-up queue.
    pub fn layer(&self) -> ConditionalCacheLayer<D> {
        ConditionalCacheLayer::new(
            self.index.clone(),
            self.server.clone(),
            self.warmup.clone(),
        )
    }

    pub fn index(&self) -> SharedIndex {
        self.index.clone()
    }

    pub fn warmup(&self) -> &WarmupHandle {
        &self.warmup
    }

    pub fn server(&self) -> &Arc<D> {
        &self.server
    }

    pub fn config(&self) -> &DevCacheConfig {
        &self.config
    }

    /// Replace the in-memory index with what the store holds. Returns the
    /// number of entries loaded.
    pub async fn hydrate(&self) -> Result<usize, DevCacheError> {
        let Some(stored) = self.store.load().await? else {
            debug!("no stored cache index");
            return Ok(0);
        };
        let loaded = stored.len();
        self.index.write().await.replace(stored);
        info!(entries = loaded, "cache index hydrated");
        Ok(loaded)
    }

    /// Hydrate the index and, unless disabled in the config, arm the
    /// interrupt handler.
    pub async fn on_server_start(
        self: &Arc<Self>,
    ) -> Result<usize, DevCacheError> {
        let loaded = self.hydrate().await?;
        if self.config.handle_interrupt {
            self.install_interrupt_handler();
        }
        Ok(loaded)
    }

    /// Collect the ETag of every transformed module, merge it into the index
    /// and overwrite the store with the whole index. Returns how many
    /// entries came from the module graph.
    pub async fn on_build_end(&self) -> Result<usize, DevCacheError> {
        let collected = self.server.module_graph().etags().await;
        let snapshot = {
            let mut index = self.index.write().await;
            index.merge(
                collected
                    .iter()
                    .map(|(url, etag)| (url.as_str(), etag.as_str())),
            );
            index.clone()
        };
        self.store.save(&snapshot).await?;
        info!(
            collected = collected.len(),
            total = snapshot.len(),
            "cache index persisted"
        );
        Ok(collected.len())
    }

    /// Stop the warm-up worker. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.shutdown().await;
        }
    }

    /// Listen for Ctrl+C once, then persist, close the server and exit the
    /// process. Returns `None` if a handler is already installed.
    pub fn install_interrupt_handler(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let signal = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(%err, "failed to listen for interrupt signal");
                std::future::pending::<()>().await;
            }
        };
        self.shutdown_on(signal, || std::process::exit(0))
    }

    /// Run the interrupt sequence when `signal` resolves, finishing with
    /// `exit`. `exit` runs even if closing the server fails or panics.
    pub fn shutdown_on<F, E>(
        self: &Arc<Self>,
        signal: F,
        exit: E,
    ) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        if self.interrupt_armed.swap(true, Ordering::SeqCst) {
            debug!("interrupt handler already installed");
            return None;
        }

        let cache = Arc::clone(self);
        Some(tokio::spawn(async move {
            signal.await;
            warn!("interrupt received, closing dev server");

            if cache.config.persist_on_interrupt {
                if let Err(err) = cache.on_build_end().await {
                    error!(%err, "failed to persist cache index on interrupt");
                }
            }
            cache.shutdown().await;

            let server = cache.server.clone();
            let closing = tokio::spawn(async move { server.close().await });
            match closing.await {
                Ok(Ok(())) => info!("dev server closed"),
                Ok(Err(err)) => error!(%err, "dev server close failed"),
                Err(err) => error!(%err, "dev server close panicked"),
            }
            exit();
        }))
    }
}

impl<D: DevServer> std::fmt::Debug for DevCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevCache")
            .field("config", &self.config)
            .field(
                "interrupt_armed",
                &self.interrupt_armed.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}
