//! The host dev server as seen by the cache middleware: a module graph with
//! per-URL transform results and a way to (re)transform a URL.

use crate::error::ServerError;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, header::ACCEPT};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Output of transforming one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    pub code: Bytes,
    pub etag: Option<String>,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// The request asked for an HTML document.
    pub html: bool,
}

impl TransformOptions {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let html = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));
        Self { html }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    pub url: String,
    pub transform_result: Option<TransformResult>,
}

/// URL -> module state. Nodes may exist before their transform completes.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    url_to_module: RwLock<HashMap<String, ModuleNode>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, url: &str) -> Option<ModuleNode> {
        self.url_to_module.read().await.get(url).cloned()
    }

    /// Register `url` without a transform result, keeping an existing node.
    pub async fn ensure_entry(&self, url: &str) {
        self.url_to_module
            .write()
            .await
            .entry(url.to_string())
            .or_insert_with(|| ModuleNode {
                url: url.to_string(),
                transform_result: None,
            });
    }

    pub async fn has_transform_result(&self, url: &str) -> bool {
        self.url_to_module
            .read()
            .await
            .get(url)
            .is_some_and(|node| node.transform_result.is_some())
    }

    pub async fn transform_result(&self, url: &str) -> Option<TransformResult> {
        self.url_to_module
            .read()
            .await
            .get(url)
            .and_then(|node| node.transform_result.clone())
    }

    pub async fn set_transform_result(&self, url: &str, result: TransformResult) {
        let mut modules = self.url_to_module.write().await;
        let node = modules.entry(url.to_string()).or_insert_with(|| ModuleNode {
            url: url.to_string(),
            transform_result: None,
        });
        node.transform_result = Some(result);
    }

    /// Drop the transform result of `url`, returns whether there was one.
    pub async fn invalidate(&self, url: &str) -> bool {
        self.url_to_module
            .write()
            .await
            .get_mut(url)
            .and_then(|node| node.transform_result.take())
            .is_some()
    }

    /// `(url, etag)` for every node whose transform result carries an ETag.
    pub async fn etags(&self) -> Vec<(String, String)> {
        self.url_to_module
            .read()
            .await
            .values()
            .filter_map(|node| {
                let etag = node.transform_result.as_ref()?.etag.as_ref()?;
                Some((node.url.clone(), etag.clone()))
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.url_to_module.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.url_to_module.read().await.is_empty()
    }
}

/// Hooks the cache middleware needs from the host dev server.
#[async_trait]
pub trait DevServer: Send + Sync + 'static {
    fn module_graph(&self) -> &ModuleGraph;

    /// Transform `url` and record the result in the module graph.
    async fn transform_request(
        &self,
        url: &str,
        options: TransformOptions,
    ) -> Result<TransformResult, ServerError>;

    /// Stop serving. Further transforms may fail with [`ServerError::Closed`].
    async fn close(&self) -> Result<(), ServerError>;
}
