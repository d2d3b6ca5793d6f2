//! Settings for the conditional cache middleware.
//!
//! Values come from a `devcache:` section of a YAML file (or the whole
//! document when there is no such section), from the builder, or from
//! `Default`.
use crate::config::{ConfigError, Configurable};
use derive_builder::Builder;
use serde::Deserialize;
use std::path::{self, PathBuf};

const SECTION: &str = "devcache";

/// Parsed YAML document, kept around so callers can look up their own keys.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    value: serde_yaml::Value,
}

impl ConfigDocument {
    pub fn open(path: impl AsRef<path::Path>) -> Result<Self, ConfigError> {
        Ok(Self {
            value: Self::load_config(path)?,
        })
    }

    pub fn from_value(value: serde_yaml::Value) -> Self {
        Self { value }
    }
}

impl Configurable for ConfigDocument {
    fn config(&self) -> &serde_yaml::Value {
        &self.value
    }
}

#[derive(Builder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[builder(public, setter(into))]
#[serde(default)]
pub struct DevCacheConfig {
    /// Project root, the cache directory is resolved against it.
    #[builder(default = "PathBuf::from(\".\")")]
    pub root: PathBuf,
    #[builder(default = "PathBuf::from(\"node_modules/.admin-cache\")")]
    pub cache_dir: PathBuf,
    #[builder(default = "\"cache.json\".to_string()")]
    pub cache_file: String,
    /// Pending warm-up requests before new ones are dropped.
    #[builder(default = "128")]
    pub warmup_queue: usize,
    /// Install the Ctrl+C handler on server start.
    #[builder(default = "true")]
    pub handle_interrupt: bool,
    /// Persist the index from the interrupt handler before closing.
    #[builder(default = "true")]
    pub persist_on_interrupt: bool,
}

impl Default for DevCacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cache_dir: PathBuf::from("node_modules/.admin-cache"),
            cache_file: "cache.json".to_string(),
            warmup_queue: 128,
            handle_interrupt: true,
            persist_on_interrupt: true,
        }
    }
}

impl DevCacheConfig {
    /// Read config from a YAML file.
    pub fn load(path: impl AsRef<path::Path>) -> Result<Self, ConfigError> {
        let document = ConfigDocument::open(path)?;
        Self::from_document(&document)
    }

    pub fn from_document(document: &ConfigDocument) -> Result<Self, ConfigError> {
        let value = document
            .get_config_value(SECTION)
            .unwrap_or_else(|| document.config());
        let config: DevCacheConfig = match value {
            serde_yaml::Value::Null => DevCacheConfig::default(),
            value => serde_yaml::from_value(value.clone())?,
        };
        config.validate()?;
        tracing::debug!(?config, "loaded devcache config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_file.trim().is_empty() {
            return Err(ConfigError::Invalid("cache_file is empty".into()));
        }
        if self.warmup_queue == 0 {
            return Err(ConfigError::Invalid(
                "warmup_queue must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// `<root>/<cache_dir>`
    pub fn cache_dir_path(&self) -> PathBuf {
        self.root.join(&self.cache_dir)
    }

    /// `<root>/<cache_dir>/<cache_file>`
    pub fn cache_file_path(&self) -> PathBuf {
        self.cache_dir_path().join(&self.cache_file)
    }
}
