use crate::{CacheError, CacheIndex, IndexStore};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

const EMPTY_INDEX: &str = "{}";

/// Index stored as a single JSON object in a file.
///
/// The file is owned by one process. Saves through the same store (or its
/// clones) are serialized; the last one wins.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store at `<dir>/<file_name>`.
    pub fn in_dir(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self::new(dir.as_ref().join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl IndexStore for JsonFileStore {
    async fn ensure(&self) -> Result<(), CacheError> {
        if let Some(dir) = self.path.parent() {
            let missing = !dir.as_os_str().is_empty()
                && !fs::try_exists(dir).await.unwrap_or(false);
            if missing {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| CacheError::io(dir, e))?;
                debug!(dir = %dir.display(), "created cache directory");
            }
        }

        if !fs::try_exists(&self.path)
            .await
            .map_err(|e| CacheError::io(&self.path, e))?
        {
            fs::write(&self.path, EMPTY_INDEX)
                .await
                .map_err(|e| CacheError::io(&self.path, e))?;
            info!(path = %self.path.display(), "created empty cache file");
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<CacheIndex>, CacheError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::io(&self.path, err)),
        };

        let index: CacheIndex =
            serde_json::from_str(&content).map_err(|source| CacheError::Json {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            path = %self.path.display(),
            entries = index.len(),
            "loaded cache index"
        );
        Ok(Some(index))
    }

    async fn save(&self, index: &CacheIndex) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(index)?;
        // atomic replace: sibling temp file, then rename
        let _guard = self.write_lock.lock().await;
        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CacheError::io(&self.path, e))?;
        debug!(
            path = %self.path.display(),
            entries = index.len(),
            "saved cache index"
        );
        Ok(())
    }
}
