//! Shared types, error model, ports, and configuration for dataflow.
//!
//! This crate is the foundation depended on by all other dataflow crates.
//! It provides:
//! - [`DataflowError`], the unified error type
//! - The [`Product`] record and its validation rules
//! - Collaborator ports ([`Fetcher`], [`IdCache`], [`ProductStore`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod ports;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheBackend, CacheConfig, DecodePolicy, PipelineSection, ServerConfig,
    SourceConfig, SourceKind, StorageConfig, config_dir, config_file_path, default_sources,
    init_config, load_config, load_config_from, resolve_config,
};
pub use error::{DataflowError, ErrorCode, Result};
pub use ports::{Fetcher, IdCache, ProductStore};
pub use types::Product;
