use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from request URL (path and query, as the server saw it) to the
/// ETag previously issued for it.
///
/// Ordered so the persisted file stays stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheIndex {
    entries: BTreeMap<String, String>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored validator for `url`, if any.
    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(url).map(String::as_str)
    }

    /// Insert or overwrite the validator for `url`, returning the old one.
    pub fn insert(
        &mut self,
        url: impl Into<String>,
        etag: impl Into<String>,
    ) -> Option<String> {
        self.entries.insert(url.into(), etag.into())
    }

    /// Merge `entries` into the index. Existing keys are overwritten, keys
    /// not present in `entries` are kept. Returns how many entries were
    /// merged.
    pub fn merge<I, K, V>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut merged = 0;
        for (url, etag) in entries {
            self.entries.insert(url.into(), etag.into());
            merged += 1;
        }
        merged
    }

    /// Replace the whole mapping, used when hydrating from storage.
    pub fn replace(&mut self, other: CacheIndex) {
        self.entries = other.entries;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for CacheIndex
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut index = CacheIndex::new();
        index.merge(iter);
        index
    }
}
