mod common;

use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::MockDevServer;
use devcache::{
    CacheIndex, DevCache, DevCacheConfigBuilder, DevServer, MemoryStore,
    WarmupEvent,
    tower::{Service, ServiceBuilder, ServiceExt, service_fn},
};
use http::{
    Method, Request, Response, StatusCode,
    header::{ACCEPT, ETAG, IF_NONE_MATCH},
};
use tokio::time::timeout;

struct Harness {
    cache: Arc<DevCache<MockDevServer>>,
    server: Arc<MockDevServer>,
    inner_calls: Arc<AtomicUsize>,
}

impl Harness {
    async fn new(entries: &[(&str, &str)]) -> Self {
        let server = Arc::new(MockDevServer::new());
        let index: CacheIndex = entries.iter().copied().collect();
        let store = Arc::new(MemoryStore::with_index(index));
        let config = DevCacheConfigBuilder::default()
            .handle_interrupt(false)
            .build()
            .unwrap();
        let cache = Arc::new(
            DevCache::with_store(config, server.clone(), store)
                .await
                .unwrap(),
        );
        cache.on_server_start().await.unwrap();

        Self {
            cache,
            server,
            inner_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn service(
        &self,
    ) -> impl Service<Request<()>, Response = Response<String>, Error = Infallible>
    + Clone {
        let calls = self.inner_calls.clone();
        let inner = service_fn(move |_req: Request<()>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(Response::new("from inner".to_string()))
            }
        });
        ServiceBuilder::new().layer(self.cache.layer()).service(inner)
    }

    async fn send(&self, req: Request<()>) -> Response<String> {
        self.service().oneshot(req).await.unwrap()
    }

    fn inner_calls(&self) -> usize {
        self.inner_calls.load(Ordering::SeqCst)
    }
}

fn get(url: &str, if_none_match: Option<&str>) -> Request<()> {
    let mut builder = Request::get(url);
    if let Some(etag) = if_none_match {
        builder = builder.header(IF_NONE_MATCH, etag);
    }
    builder.body(()).unwrap()
}

#[tokio::test]
async fn test_no_stored_validator_defers_to_inner() {
    let harness = Harness::new(&[]).await;

    let response = harness.send(get("/a.js", Some("etag1"))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "from inner");
    assert_eq!(harness.inner_calls(), 1);
    assert!(harness.server.transforms().is_empty());
}

#[tokio::test]
async fn test_matching_validator_without_transform_is_304() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    let mut events = harness.cache.warmup().subscribe();

    let response = harness.send(get("/a.js", Some("etag1"))).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(response.body().is_empty());
    assert_eq!(response.headers()[ETAG], "etag1");
    assert_eq!(harness.inner_calls(), 0);

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        WarmupEvent::Completed {
            url: "/a.js".to_string()
        }
    );
    assert!(
        harness
            .server
            .module_graph()
            .has_transform_result("/a.js")
            .await
    );
    let transforms = harness.server.transforms();
    assert_eq!(transforms.len(), 1);
    assert_eq!(transforms[0].0, "/a.js");
    assert!(!transforms[0].1.html);
}

#[tokio::test]
async fn test_matching_validator_with_transform_defers_to_inner() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    harness
        .server
        .module_graph()
        .set_transform_result("/a.js", MockDevServer::result_for("/a.js"))
        .await;

    let response = harness.send(get("/a.js", Some("etag1"))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.inner_calls(), 1);
    assert!(harness.server.transforms().is_empty());
}

#[tokio::test]
async fn test_graph_entry_without_result_still_short_circuits() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    harness.server.module_graph().ensure_entry("/a.js").await;

    let response = harness.send(get("/a.js", Some("etag1"))).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(harness.inner_calls(), 0);
}

#[tokio::test]
async fn test_second_request_after_warmup_defers_to_inner() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    let mut events = harness.cache.warmup().subscribe();

    let first = harness.send(get("/a.js", Some("etag1"))).await;
    assert_eq!(first.status(), StatusCode::NOT_MODIFIED);
    timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    let second = harness.send(get("/a.js", Some("etag1"))).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(harness.inner_calls(), 1);
}

#[tokio::test]
async fn test_invalidated_module_short_circuits_again() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    let graph = harness.server.module_graph();
    graph
        .set_transform_result("/a.js", MockDevServer::result_for("/a.js"))
        .await;
    assert!(graph.invalidate("/a.js").await);

    let response = harness.send(get("/a.js", Some("etag1"))).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_mismatched_validator_defers_to_inner() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;

    let response = harness.send(get("/a.js", Some("etag-stale"))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.inner_calls(), 1);
}

#[tokio::test]
async fn test_missing_if_none_match_defers_to_inner() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;

    let response = harness.send(get("/a.js", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.inner_calls(), 1);
}

#[tokio::test]
async fn test_non_get_requests_pass_through() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/a.js")
        .header(IF_NONE_MATCH, "etag1")
        .body(())
        .unwrap();

    let response = harness.send(req).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.inner_calls(), 1);
}

#[tokio::test]
async fn test_query_string_is_part_of_the_key() {
    let harness = Harness::new(&[("/src/App.vue?vue&type=style", "etag1")]).await;

    let plain = harness.send(get("/src/App.vue", Some("etag1"))).await;
    assert_eq!(plain.status(), StatusCode::OK);

    let styled = harness
        .send(get("/src/App.vue?vue&type=style", Some("etag1")))
        .await;
    assert_eq!(styled.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_html_accept_is_forwarded_to_warmup() {
    let harness = Harness::new(&[("/", "etag-index")]).await;
    let mut events = harness.cache.warmup().subscribe();
    let req = Request::get("/")
        .header(IF_NONE_MATCH, "etag-index")
        .header(ACCEPT, "text/html,application/xhtml+xml")
        .body(())
        .unwrap();

    let response = harness.send(req).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    let transforms = harness.server.transforms();
    assert_eq!(transforms.len(), 1);
    assert!(transforms[0].1.html);
}

#[tokio::test]
async fn test_failed_warmup_still_serves_304() {
    let harness = Harness::new(&[("/broken.js", "etag1")]).await;
    harness.server.fail_transform("/broken.js");
    let mut events = harness.cache.warmup().subscribe();

    let response = harness.send(get("/broken.js", Some("etag1"))).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, WarmupEvent::Failed { url, .. } if url == "/broken.js"));
    assert!(
        !harness
            .server
            .module_graph()
            .has_transform_result("/broken.js")
            .await
    );
}

#[tokio::test]
async fn test_head_request_is_304_and_warms() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    let mut events = harness.cache.warmup().subscribe();
    let req = Request::head("/a.js")
        .header(IF_NONE_MATCH, "etag1")
        .body(())
        .unwrap();

    let response = harness.send(req).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(response.body().is_empty());
    assert_eq!(harness.inner_calls(), 0);

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        WarmupEvent::Completed {
            url: "/a.js".to_string()
        }
    );
    assert_eq!(harness.server.transforms().len(), 1);
}

#[tokio::test]
async fn test_stopped_warmup_still_serves_304() {
    let harness = Harness::new(&[("/a.js", "etag1")]).await;
    harness.cache.shutdown().await;

    let response = harness.send(get("/a.js", Some("etag1"))).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(!harness.cache.warmup().is_pending("/a.js"));
    assert!(harness.server.transforms().is_empty());
}
