use crate::{CacheError, CacheIndex};
use async_trait::async_trait;

/// Persistence backend for a [`CacheIndex`].
///
/// The index is always read and written wholesale; backends never see
/// partial updates.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Make sure the backing storage exists, creating an empty index if not.
    async fn ensure(&self) -> Result<(), CacheError>;

    /// Load the stored index. A missing store yields `None`.
    async fn load(&self) -> Result<Option<CacheIndex>, CacheError>;

    /// Overwrite the stored index with `index`.
    async fn save(&self, index: &CacheIndex) -> Result<(), CacheError>;
}
