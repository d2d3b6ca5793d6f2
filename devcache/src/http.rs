//! hyper-based accept loop serving a tower stack.
use std::{error::Error as StdError, future::Future, io};

use hyper::{Request, Response, body::Incoming};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use tokio::net::TcpListener;
use tower::Service;
use tracing::{debug, error, info};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Serve `service` on `listener` until `shutdown` resolves.
///
/// Connections already accepted keep running on their own tasks; there is no
/// drain on shutdown.
pub async fn serve<S, B, F>(
    listener: TcpListener,
    service: S,
    shutdown: F,
) -> io::Result<()>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "dev server listening");
    }
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("dev server stopped accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "connection accepted");
                let io = TokioIo::new(stream);
                let service = TowerToHyperService::new(service.clone());
                tokio::spawn(async move {
                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        error!(%peer, ?err, "dev server connection error");
                    }
                });
            }
        }
    }
}
