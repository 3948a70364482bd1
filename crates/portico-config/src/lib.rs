//! # portico-config
//!
//! Configuration for the gateway: a `portico.toml` schema with serde
//! defaults, environment-variable overrides applied after parse, and
//! validation that separates fatal errors from warnings.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    ApiKeyConfig, CacheConfig, DispatchConfig, LedgerConfig, LogConfig, PorticoConfig,
    ProviderConfig, ServerConfig,
};
