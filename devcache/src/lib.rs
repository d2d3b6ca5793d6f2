//! # devcache
//!
//! Conditional caching for local dev servers.
//!
//! A dev server throws away its module transform cache on every restart, so
//! the first page load after a restart pays for transforming every module
//! again even though the browser still holds valid copies. `devcache` keeps a
//! small JSON index of the ETags the server issued (path -> ETag) across
//! runs. When a request's `If-None-Match` matches a persisted ETag and the
//! module has not been transformed yet in this run, the middleware answers
//! `304 Not Modified` immediately and re-transforms the module in the
//! background.
//!
//! ## Pieces
//!
//! - [`DevCache`]: lifecycle owner (hydrate on start, persist on build end,
//!   interrupt handling, warm-up worker).
//! - [`ConditionalCacheLayer`] / [`ConditionalCacheService`]: the tower
//!   middleware.
//! - [`DevServer`] and [`ModuleGraph`]: what the host server must provide.
//! - [`FsDevServer`]: a file-serving dev server to run it all end to end.
//! - [`http::serve`]: hyper accept loop for any tower stack.
//!
//! The index and its stores live in `devcache-index`, settings in
//! `devcache-config`; both are re-exported here.
pub mod error;
pub mod fs_server;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod plugin;
pub mod server;
pub mod warmup;

pub use error::{DevCacheError, ServerError};
pub use fs_server::{FsDevServer, FsService, weak_etag};
pub use middleware::{
    CacheDecision, ConditionalCacheLayer, ConditionalCacheService, SharedIndex,
    decide, etag_matches,
};
pub use plugin::DevCache;
pub use server::{
    DevServer, ModuleGraph, ModuleNode, TransformOptions, TransformResult,
};
pub use warmup::{WarmupEvent, WarmupHandle, WarmupRejected, WarmupTicket};

pub use devcache_config as config;
pub use devcache_config::{DevCacheConfig, DevCacheConfigBuilder};
pub use devcache_index as index;
pub use devcache_index::{CacheIndex, IndexStore, JsonFileStore, MemoryStore};
// re-export
pub use async_trait;
pub use tower;
pub use tracing;
pub use tracing_subscriber;
