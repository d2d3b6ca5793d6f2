//! A minimal dev server that serves files from a directory.
//!
//! The "transform" is the identity: the file content is recorded in the
//! module graph together with a weak ETag. It is enough to run the cache
//! middleware end to end and doubles as the continuation service behind it.

use crate::{
    error::ServerError,
    middleware::{etag_matches, request_key},
    server::{DevServer, ModuleGraph, TransformOptions, TransformResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{
    HeaderValue, Method, Request, Response, StatusCode,
    header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH},
};
use http_body_util::Full;
use std::{
    convert::Infallible,
    future::Future,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::watch;
use tower::Service;
use tracing::{debug, error, info};

type RespBody = Full<Bytes>;

/// Weak ETag from content length and MD5 digest, e.g. `W/"1a-9e10..."`.
pub fn weak_etag(content: &[u8]) -> String {
    format!("W/\"{:x}-{:x}\"", content.len(), md5::compute(content))
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") | Some("ts") | Some("jsx") | Some("tsx")
        | Some("vue") => "application/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

pub struct FsDevServer {
    root: PathBuf,
    graph: ModuleGraph,
    closed: watch::Sender<bool>,
}

impl FsDevServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            root: root.into(),
            graph: ModuleGraph::new(),
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`DevServer::close`] was called.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.closed.subscribe();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Map a request URL onto a file under the root. Query strings are
    /// ignored and `..` segments are rejected.
    fn resolve(
        &self,
        url: &str,
        options: TransformOptions,
    ) -> Result<PathBuf, ServerError> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(path.trim_start_matches('/'));

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(ServerError::NotFound(url.to_string())),
            }
        }

        let wants_index = path.ends_with('/')
            || relative.as_os_str().is_empty()
            || (options.html && relative.extension().is_none());
        if wants_index {
            resolved.push("index.html");
        }
        Ok(resolved)
    }

    /// Tower service serving modules from this server.
    pub fn service(self: &Arc<Self>) -> FsService {
        FsService {
            server: Arc::clone(self),
        }
    }
}

#[async_trait]
impl DevServer for FsDevServer {
    fn module_graph(&self) -> &ModuleGraph {
        &self.graph
    }

    async fn transform_request(
        &self,
        url: &str,
        options: TransformOptions,
    ) -> Result<TransformResult, ServerError> {
        if self.is_closed() {
            return Err(ServerError::Closed);
        }

        let path = self.resolve(url, options)?;
        let code = match tokio::fs::read(&path).await {
            Ok(code) => Bytes::from(code),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ServerError::NotFound(url.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let result = TransformResult {
            etag: Some(weak_etag(&code)),
            content_type: content_type_for(&path).to_string(),
            code,
        };
        self.graph.set_transform_result(url, result.clone()).await;
        debug!(url, path = %path.display(), "module transformed");
        Ok(result)
    }

    async fn close(&self) -> Result<(), ServerError> {
        self.closed.send_replace(true);
        info!(root = %self.root.display(), "dev server closed");
        Ok(())
    }
}

/// Serves transformed modules, using the module graph as an in-memory cache.
#[derive(Clone)]
pub struct FsService {
    server: Arc<FsDevServer>,
}

impl<B> Service<Request<B>> for FsService
where
    B: Send + 'static,
{
    type Response = Response<RespBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let server = self.server.clone();
        Box::pin(async move { Ok(serve_module(&server, req).await) })
    }
}

async fn serve_module<B>(
    server: &FsDevServer,
    req: Request<B>,
) -> Response<RespBody> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return build_response(StatusCode::METHOD_NOT_ALLOWED, Bytes::new());
    }

    let key = request_key(&req).to_string();
    let result = match server.module_graph().transform_result(&key).await {
        Some(result) => result,
        None => {
            let options = TransformOptions::from_headers(req.headers());
            match server.transform_request(&key, options).await {
                Ok(result) => result,
                Err(ServerError::NotFound(_)) => {
                    return build_response(StatusCode::NOT_FOUND, "not found");
                }
                Err(err) => {
                    error!(url = %key, %err, "transform failed");
                    return build_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        err.to_string(),
                    );
                }
            }
        }
    };

    let etag = result.etag.as_deref();
    let fresh = match (etag, req.headers().get(IF_NONE_MATCH)) {
        (Some(etag), Some(inm)) => {
            inm.to_str().is_ok_and(|inm| etag_matches(etag, inm))
        }
        _ => false,
    };

    let mut response = if fresh {
        build_response(StatusCode::NOT_MODIFIED, Bytes::new())
    } else if req.method() == Method::HEAD {
        build_response(StatusCode::OK, Bytes::new())
    } else {
        build_response(StatusCode::OK, result.code.clone())
    };

    let headers = response.headers_mut();
    if let Some(value) = etag.and_then(|etag| HeaderValue::from_str(etag).ok()) {
        headers.insert(ETAG, value);
    }
    if !fresh {
        if let Ok(value) = HeaderValue::from_str(&result.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    response
}

fn build_response(
    status: StatusCode,
    body: impl Into<Bytes>,
) -> Response<RespBody> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
