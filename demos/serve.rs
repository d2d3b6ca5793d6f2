//! Serve a directory with the conditional cache in front.
//!
//! ```sh
//! cargo run --example serve -- ./site [devcache.yml]
//! ```
//!
//! Reload a page, stop with Ctrl+C, start again: modules the browser already
//! holds are answered with 304 before the server transforms them.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use devcache::{
    DevCache, DevCacheConfig, FsDevServer, http::serve, logging::init_tracing,
    tower::ServiceBuilder, tracing,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info,devcache=debug")?;

    let mut args = std::env::args().skip(1);
    let root = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));
    let mut config = match args.next() {
        Some(path) => DevCacheConfig::load(path)?,
        None => DevCacheConfig::default(),
    };
    config.root = root.clone();

    let server = Arc::new(FsDevServer::new(&root));
    let cache = Arc::new(DevCache::new(config, server.clone()).await?);
    let loaded = cache.on_server_start().await?;
    tracing::info!(loaded, root = %root.display(), "devcache ready");

    let service = ServiceBuilder::new()
        .layer(cache.layer())
        .service(server.service());

    let addr = SocketAddr::from(([127, 0, 0, 1], 5173));
    let listener = TcpListener::bind(addr).await?;
    serve(listener, service, server.closed()).await?;
    Ok(())
}
