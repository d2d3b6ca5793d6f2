use devcache_config::ConfigError;
use devcache_index::CacheError;
use thiserror::Error;

/// Errors reported by a [`DevServer`](crate::server::DevServer).
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transform failed for {url}: {reason}")]
    Transform { url: String, reason: String },

    #[error("Dev server is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum DevCacheError {
    #[error("Cache index error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dev server error: {0}")]
    Server(#[from] ServerError),
}
