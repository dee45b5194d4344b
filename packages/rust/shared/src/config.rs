//! Application configuration for dataflow.
//!
//! User config lives at `~/.dataflow/dataflow.toml`; `--config` points at
//! another file. CLI flags override config file values, which override
//! defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DataflowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "dataflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dataflow";

// ---------------------------------------------------------------------------
// Config structs (matching dataflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source identifiers processed by `dataflow run` when none are given.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Where source payloads are fetched from.
    #[serde(default)]
    pub source: SourceConfig,

    /// Durable product store.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Identifier cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Read endpoint.
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            pipeline: PipelineSection::default(),
            source: SourceConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.fetch_concurrency == 0 {
            return Err(DataflowError::config("pipeline.fetch_concurrency must be at least 1"));
        }
        if self.pipeline.persist_concurrency == 0 {
            return Err(DataflowError::config(
                "pipeline.persist_concurrency must be at least 1",
            ));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(DataflowError::config("pipeline.channel_capacity must be at least 1"));
        }
        if self.source.kind == SourceKind::Http && self.source.base_url.is_none() {
            return Err(DataflowError::config(
                "source.base_url is required when source.kind = \"http\"",
            ));
        }
        Ok(())
    }
}

/// The four product files the job ingests by default.
pub fn default_sources() -> Vec<String> {
    (1..=4).map(|i| format!("products-{i}.jsonl")).collect()
}

/// What the decode stage does with a line that is not a valid product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Log, count and drop the line; the run continues.
    #[default]
    Skip,
    /// Report the failure on the decode stage's error channel, which ends
    /// the run like any other stage error.
    Abort,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Maximum concurrent source retrievals.
    #[serde(default = "default_concurrency")]
    pub fetch_concurrency: usize,

    /// Maximum concurrent cache-gated writes.
    #[serde(default = "default_concurrency")]
    pub persist_concurrency: usize,

    /// Buffer size of the data channels between stages.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Handling of undecodable lines.
    #[serde(default)]
    pub decode_policy: DecodePolicy,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_concurrency(),
            persist_concurrency: default_concurrency(),
            channel_capacity: default_channel_capacity(),
            decode_policy: DecodePolicy::default(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_channel_capacity() -> usize {
    64
}

/// Fetch backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Read `<root>/<source id>` from the local filesystem.
    #[default]
    File,
    /// GET `<base_url>/<source id>`.
    Http,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Directory holding source files (file backend).
    #[serde(default = "default_source_root")]
    pub root: String,

    /// Base URL sources are resolved against (http backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds (http backend).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            root: default_source_root(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source_root() -> String {
    "var/sources".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the libSQL database file.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> String {
    "var/dataflow.db".into()
}

/// Identifier cache backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// `seen_ids` table next to the products; survives across runs.
    #[default]
    Storage,
    /// Process-local set; forgotten when the process exits.
    Memory,
}

/// `[cache]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the read endpoint.
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8080".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.dataflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DataflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.dataflow/dataflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DataflowError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Err(e) => return Err(DataflowError::io(path, e)),
    };

    toml::from_str(&content)
        .map_err(|e| DataflowError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Load from an explicit path when one is given, otherwise from the default
/// location, then validate.
pub fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let config = match explicit {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DataflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DataflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DataflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
