#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use devcache::{
    DevServer, ModuleGraph, ServerError, TransformOptions, TransformResult,
    async_trait::async_trait,
};

/// Dev server double: transforms any url into `etag-<url>` and records calls.
#[derive(Default)]
pub struct MockDevServer {
    graph: ModuleGraph,
    transforms: Mutex<Vec<(String, TransformOptions)>>,
    failing: Mutex<HashSet<String>>,
    closes: AtomicUsize,
    fail_close: bool,
}

impl MockDevServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    pub fn etag_for(url: &str) -> String {
        format!("etag-{url}")
    }

    pub fn result_for(url: &str) -> TransformResult {
        TransformResult {
            code: Bytes::from(format!("// {url}")),
            etag: Some(Self::etag_for(url)),
            content_type: "application/javascript".to_string(),
        }
    }

    pub fn fail_transform(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn transforms(&self) -> Vec<(String, TransformOptions)> {
        self.transforms.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DevServer for MockDevServer {
    fn module_graph(&self) -> &ModuleGraph {
        &self.graph
    }

    async fn transform_request(
        &self,
        url: &str,
        options: TransformOptions,
    ) -> Result<TransformResult, ServerError> {
        self.transforms
            .lock()
            .unwrap()
            .push((url.to_string(), options));
        if self.failing.lock().unwrap().contains(url) {
            return Err(ServerError::Transform {
                url: url.to_string(),
                reason: "syntax error".to_string(),
            });
        }
        let result = Self::result_for(url);
        self.graph.set_transform_result(url, result.clone()).await;
        Ok(result)
    }

    async fn close(&self) -> Result<(), ServerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(ServerError::Closed)
        } else {
            Ok(())
        }
    }
}
