pub mod config;
pub mod devcache;

pub use config::{ConfigError, Configurable};
pub use devcache::{
    ConfigDocument, DevCacheConfig, DevCacheConfigBuilder,
    DevCacheConfigBuilderError,
};
