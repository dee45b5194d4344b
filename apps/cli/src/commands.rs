//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use dataflow_core::{
    CancellationToken, PersistOutcome, Pipeline, PipelineConfig, ProgressReporter, RunSummary,
};
use dataflow_fetch::{FileFetcher, HttpFetcher};
use dataflow_shared::{
    AppConfig, CacheBackend, Fetcher, IdCache, ProductStore, SourceKind, init_config,
    resolve_config,
};
use dataflow_storage::{MemoryIdCache, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::server;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// dataflow: load line-delimited JSON products into a durable store.
#[derive(Parser)]
#[command(
    name = "dataflow",
    version,
    about = "Load line-delimited JSON products into a durable store, skipping ids already seen.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.dataflow/dataflow.toml).
    #[arg(long, global = true, env = "DATAFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline over a set of sources.
    Run {
        /// Source ids to load (defaults to `sources` from the config file).
        sources: Vec<String>,

        /// Width for both the fetch and persist stages.
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Serve `GET /product/:id` from the store.
    Serve {
        /// Listen address (defaults to `[server] address`).
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Look up one product by id and print it as JSON.
    Get {
        /// Product id.
        id: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "dataflow=info",
        1 => "dataflow=debug",
        _ => "dataflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            sources,
            concurrency,
        } => cmd_run(config_path, sources, concurrency).await,
        Command::Serve { address } => cmd_serve(config_path, address).await,
        Command::Get { id } => cmd_get(config_path, id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    sources: Vec<String>,
    concurrency: Option<usize>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let sources = if sources.is_empty() {
        config.sources.clone()
    } else {
        sources
    };

    let mut pipeline_config = PipelineConfig::from(&config.pipeline);
    if let Some(width) = concurrency {
        if width == 0 {
            return Err(eyre!("--concurrency must be at least 1"));
        }
        pipeline_config = pipeline_config.with_concurrency(width);
    }

    let storage = Arc::new(Storage::open(Path::new(&config.storage.path)).await?);
    let cache: Arc<dyn IdCache> = match config.cache.backend {
        CacheBackend::Storage => storage.clone(),
        CacheBackend::Memory => Arc::new(MemoryIdCache::new()),
    };
    let fetcher = build_fetcher(&config)?;

    info!(
        sources = sources.len(),
        source_kind = ?config.source.kind,
        store = %config.storage.path,
        cache = ?config.cache.backend,
        "loading products"
    );

    let cancel = cancel_on_interrupt();
    let progress = Arc::new(CliProgress::new());
    let pipeline = Pipeline::new(fetcher, cache, storage.clone(), pipeline_config)
        .with_progress(progress.clone());

    let result = pipeline.run(&cancel, sources).await;
    progress.clear();
    let summary = result?;

    print_summary(&summary, storage.count_products().await?);
    Ok(())
}

async fn cmd_serve(config_path: Option<&Path>, address: Option<String>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let address = address.unwrap_or_else(|| config.server.address.clone());
    let store: Arc<dyn ProductStore> =
        Arc::new(Storage::open(Path::new(&config.storage.path)).await?);

    println!("Serving products on http://{address}/product/:id");
    server::serve(&address, store, cancel_on_interrupt()).await?;
    Ok(())
}

async fn cmd_get(config_path: Option<&Path>, id: u32) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open(Path::new(&config.storage.path)).await?;
    let product = storage.find_by_id(id).await?;
    println!("{}", serde_json::to_string_pretty(&product)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

fn build_fetcher(config: &AppConfig) -> Result<Arc<dyn Fetcher>> {
    let fetcher: Arc<dyn Fetcher> = match config.source.kind {
        SourceKind::File => Arc::new(FileFetcher::new(&config.source.root)),
        SourceKind::Http => {
            let base_url = config
                .source
                .base_url
                .as_deref()
                .ok_or_else(|| eyre!("[source] base_url is required when kind = \"http\""))?;
            Arc::new(HttpFetcher::new(
                base_url,
                Duration::from_secs(config.source.timeout_secs),
            )?)
        }
    };
    Ok(fetcher)
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            trigger.cancel();
        }
    });
    cancel
}

fn print_summary(summary: &RunSummary, total_products: u64) {
    println!();
    println!("  Run complete.");
    println!("  Sources:   {}", summary.sources_fetched);
    println!("  Lines:     {}", summary.lines_split);
    println!("  Stored:    {}", summary.records_stored);
    println!("  Skipped:   {}", summary.records_skipped);
    if summary.decode_skipped > 0 {
        println!("  Malformed: {}", summary.decode_skipped);
    }
    println!("  In store:  {total_products}");
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    sources: AtomicUsize,
    records: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.set_message("Fetching sources");
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner,
            sources: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
        }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }

    fn refresh(&self) {
        let sources = self.sources.load(Ordering::Relaxed);
        let records = self.records.load(Ordering::Relaxed);
        self.spinner
            .set_message(format!("{sources} sources fetched, {records} records processed"));
    }
}

impl ProgressReporter for CliProgress {
    fn source_fetched(&self, _source_id: &str, _bytes: usize) {
        self.sources.fetch_add(1, Ordering::Relaxed);
        self.refresh();
    }

    fn record_persisted(&self, _id: u32, _outcome: PersistOutcome) {
        self.records.fetch_add(1, Ordering::Relaxed);
        self.refresh();
    }

    fn done(&self, _summary: &RunSummary) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "dataflow",
            "--config",
            "/tmp/df.toml",
            "-vv",
            "run",
            "products-1.jsonl",
            "products-2.jsonl",
            "--concurrency",
            "8",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/df.toml")));
        match cli.command {
            Command::Run {
                sources,
                concurrency,
            } => {
                assert_eq!(sources, vec!["products-1.jsonl", "products-2.jsonl"]);
                assert_eq!(concurrency, Some(8));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn get_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["dataflow", "get", "abc"]).is_err());
    }

    #[test]
    fn file_source_builds_fetcher() {
        let config = AppConfig::default();
        assert!(build_fetcher(&config).is_ok());
    }

    #[test]
    fn http_source_without_base_url_is_rejected() {
        let mut config = AppConfig::default();
        config.source.kind = SourceKind::Http;
        assert!(build_fetcher(&config).is_err());
    }
}
