//! Conditional cache middleware.
//!
//! Sits in front of the dev server's request pipeline. When a client sends an
//! `If-None-Match` that equals the ETag we persisted in a previous run, and
//! the server has not transformed the module yet in this run, we answer `304`
//! right away and warm the module in the background instead of making the
//! client wait for the transform.

use crate::{
    server::{DevServer, TransformOptions},
    warmup::WarmupHandle,
};
use devcache_index::CacheIndex;
use http::{
    HeaderValue, Method, Request, Response, StatusCode,
    header::{ETAG, IF_NONE_MATCH},
};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::RwLock;
use tower::{Layer, Service};
use tracing::{debug, trace};

/// Index shared between the lifecycle owner and the middleware.
pub type SharedIndex = Arc<RwLock<CacheIndex>>;

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// What the middleware does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// No stored validator or no match, hand over to the inner service.
    PassThrough,
    /// Validator matches but the module graph already has the transform,
    /// let the server's own cache answer.
    DeferToModuleGraph,
    /// Validator matches and nothing is transformed yet: answer 304.
    NotModified,
}

/// Decide how to handle a request from the stored validator, the request's
/// `If-None-Match` value and whether the module graph holds a transform.
///
/// A missing `If-None-Match` never short-circuits, even when a validator is
/// stored.
pub fn decide(
    stored: Option<&str>,
    if_none_match: Option<&str>,
    has_transform_result: bool,
) -> CacheDecision {
    let matched = match (stored, if_none_match) {
        (Some(stored), Some(if_none_match)) => {
            etag_matches(stored, if_none_match)
        }
        _ => false,
    };

    if !matched {
        CacheDecision::PassThrough
    } else if has_transform_result {
        CacheDecision::DeferToModuleGraph
    } else {
        CacheDecision::NotModified
    }
}

/// Weak comparison of `stored` against `if_none_match`, first as a whole and
/// then against every tag of the list. Commas inside quotes belong to the tag.
pub fn etag_matches(stored: &str, if_none_match: &str) -> bool {
    let stored = strip_weak(stored.trim());
    if strip_weak(if_none_match.trim()) == stored {
        return true;
    }
    split_tags(if_none_match)
        .into_iter()
        .any(|tag| strip_weak(tag) == stored)
}

fn split_tags(header: &str) -> Vec<&str> {
    let mut tags = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in header.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                tags.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    tags.push(&header[start..]);
    tags.into_iter()
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Key used in the index: path plus query, as the server received it.
pub fn request_key<B>(req: &Request<B>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}

struct CacheState<D> {
    index: SharedIndex,
    server: Arc<D>,
    warmup: WarmupHandle,
}

impl<D: DevServer> CacheState<D> {
    async fn evaluate(
        &self,
        key: &str,
        if_none_match: Option<&str>,
    ) -> Decision {
        let stored = self.index.read().await.get(key).map(str::to_string);
        let has_transform_result = match (&stored, if_none_match) {
            (Some(_), Some(_)) => {
                self.server.module_graph().has_transform_result(key).await
            }
            _ => false,
        };
        let decision =
            decide(stored.as_deref(), if_none_match, has_transform_result);
        Decision { decision, stored }
    }
}

struct Decision {
    decision: CacheDecision,
    stored: Option<String>,
}

/// [`Layer`] installing [`ConditionalCacheService`].
pub struct ConditionalCacheLayer<D> {
    state: Arc<CacheState<D>>,
}

impl<D> Clone for ConditionalCacheLayer<D> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<D: DevServer> ConditionalCacheLayer<D> {
    pub fn new(
        index: SharedIndex,
        server: Arc<D>,
        warmup: WarmupHandle,
    ) -> Self {
        Self {
            state: Arc::new(CacheState {
                index,
                server,
                warmup,
            }),
        }
    }
}

impl<S, D> Layer<S> for ConditionalCacheLayer<D> {
    type Service = ConditionalCacheService<S, D>;

    fn layer(&self, inner: S) -> Self::Service {
        ConditionalCacheService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Answers `304` for requests whose validator we still trust, otherwise
/// defers to `inner`.
pub struct ConditionalCacheService<S, D> {
    inner: S,
    state: Arc<CacheState<D>>,
}

impl<S: Clone, D> Clone for ConditionalCacheService<S, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S, D, ReqBody, ResBody> Service<Request<ReqBody>>
    for ConditionalCacheService<S, D>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    D: DevServer,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // take the service that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = self.state.clone();

        Box::pin(async move {
            if req.method() != Method::GET && req.method() != Method::HEAD {
                return inner.call(req).await;
            }

            let key = request_key(&req).to_string();
            let if_none_match = req
                .headers()
                .get(IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let Decision { decision, stored } =
                state.evaluate(&key, if_none_match.as_deref()).await;
            trace!(url = %key, ?decision, "conditional cache decision");

            match decision {
                CacheDecision::PassThrough => inner.call(req).await,
                CacheDecision::DeferToModuleGraph => {
                    debug!(url = %key, "validator matches, module graph is warm");
                    inner.call(req).await
                }
                CacheDecision::NotModified => {
                    debug!(url = %key, "answering 304 from persisted validator");
                    let options = TransformOptions::from_headers(req.headers());
                    // the ticket is not awaited, completion is observable via
                    // WarmupHandle::subscribe
                    if let Err(rejected) = state.warmup.schedule(&key, options) {
                        debug!(url = %key, %rejected, "warm-up not scheduled");
                    }
                    Ok(not_modified(stored.as_deref()))
                }
            }
        })
    }
}

fn not_modified<B: Default>(etag: Option<&str>) -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    if let Some(value) = etag.and_then(|etag| HeaderValue::from_str(etag).ok()) {
        response.headers_mut().insert(ETAG, value);
    }
    response
}
