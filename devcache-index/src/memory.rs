//! In-memory implementation of the IndexStore trait. Nothing survives the
//! process, which is what tests and throwaway servers want.
use crate::{CacheError, CacheIndex, IndexStore};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    stored: Mutex<Option<CacheIndex>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `index`, as if a previous run had saved it.
    pub fn with_index(index: CacheIndex) -> Self {
        Self {
            stored: Mutex::new(Some(index)),
            saves: Mutex::new(0),
        }
    }

    /// Snapshot of what is currently stored.
    pub async fn snapshot(&self) -> Option<CacheIndex> {
        self.stored.lock().await.clone()
    }

    /// Number of `save` calls so far.
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn ensure(&self) -> Result<(), CacheError> {
        let mut stored = self.stored.lock().await;
        if stored.is_none() {
            *stored = Some(CacheIndex::new());
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<CacheIndex>, CacheError> {
        Ok(self.stored.lock().await.clone())
    }

    async fn save(&self, index: &CacheIndex) -> Result<(), CacheError> {
        *self.stored.lock().await = Some(index.clone());
        *self.saves.lock().await += 1;
        Ok(())
    }
}
