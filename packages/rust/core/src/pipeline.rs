//! Run orchestration: fetch → split → decode → persist, joined by channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use dataflow_shared::{DecodePolicy, Fetcher, IdCache, PipelineSection, Product, ProductStore, Result};

use crate::fan_in::{merge_errors, wait_for_first_error};
use crate::persist::{CacheGatedWriter, PersistOutcome};

/// Runtime knobs for one [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum retrievals in flight.
    pub fetch_concurrency: usize,
    /// Maximum cache-gated writes in flight.
    pub persist_concurrency: usize,
    /// Capacity of the data channels between stages.
    pub channel_capacity: usize,
    /// What the decode stage does with a malformed line.
    pub decode_policy: DecodePolicy,
}

impl PipelineConfig {
    /// Use `width` for both the fetch and persist stages.
    pub fn with_concurrency(mut self, width: usize) -> Self {
        self.fetch_concurrency = width;
        self.persist_concurrency = width;
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl From<&PipelineSection> for PipelineConfig {
    fn from(section: &PipelineSection) -> Self {
        Self {
            fetch_concurrency: section.fetch_concurrency,
            persist_concurrency: section.persist_concurrency,
            channel_capacity: section.channel_capacity,
            decode_policy: section.decode_policy,
        }
    }
}

/// Counts reported after a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub sources_fetched: usize,
    pub lines_split: usize,
    pub records_decoded: usize,
    /// Malformed lines dropped under [`DecodePolicy::Skip`].
    pub decode_skipped: usize,
    pub records_stored: usize,
    /// Records whose id was already cached.
    pub records_skipped: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a source payload has been retrieved.
    fn source_fetched(&self, source_id: &str, bytes: usize);
    /// Called when a record leaves the persist stage without error.
    fn record_persisted(&self, id: u32, outcome: PersistOutcome);
    /// Called when the run completes successfully.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn source_fetched(&self, _source_id: &str, _bytes: usize) {}
    fn record_persisted(&self, _id: u32, _outcome: PersistOutcome) {}
    fn done(&self, _summary: &RunSummary) {}
}

#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub(crate) sources_fetched: AtomicUsize,
    pub(crate) lines_split: AtomicUsize,
    pub(crate) records_decoded: AtomicUsize,
    pub(crate) decode_skipped: AtomicUsize,
    pub(crate) records_stored: AtomicUsize,
    pub(crate) records_skipped: AtomicUsize,
}

impl RunCounters {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared by every stage of one run: the cancellation signal and
/// the counters that feed [`RunSummary`].
#[derive(Debug, Clone)]
pub struct RunContext {
    pub(crate) cancel: CancellationToken,
    pub(crate) counters: Arc<RunCounters>,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            counters: Arc::new(RunCounters::default()),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Snapshot the counters.
    pub fn summary(&self, elapsed: Duration) -> RunSummary {
        let c = &self.counters;
        RunSummary {
            sources_fetched: c.sources_fetched.load(Ordering::Relaxed),
            lines_split: c.lines_split.load(Ordering::Relaxed),
            records_decoded: c.records_decoded.load(Ordering::Relaxed),
            decode_skipped: c.decode_skipped.load(Ordering::Relaxed),
            records_stored: c.records_stored.load(Ordering::Relaxed),
            records_skipped: c.records_skipped.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// The staged loader. Cheap to share; each [`Pipeline::run`] call builds
/// its own channels, permit pools and counters.
pub struct Pipeline {
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) writer: CacheGatedWriter,
    pub(crate) config: PipelineConfig,
    pub(crate) progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn IdCache>,
        store: Arc<dyn ProductStore>,
        mut config: PipelineConfig,
    ) -> Self {
        config.fetch_concurrency = config.fetch_concurrency.max(1);
        config.persist_concurrency = config.persist_concurrency.max(1);
        config.channel_capacity = config.channel_capacity.max(1);
        Self {
            fetcher,
            writer: CacheGatedWriter::new(cache, store),
            config,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cache-gated write of a single product outside a run.
    pub async fn persist_product(
        &self,
        cancel: &CancellationToken,
        product: &Product,
    ) -> Result<PersistOutcome> {
        self.writer.persist(product, cancel).await
    }

    /// Load every source into the store and return once all stages have
    /// drained, or with the first error any stage reports.
    ///
    /// The run works under a child of `cancel` and cancels it on return, so
    /// work still in flight after an error stops at its next suspension
    /// point. Writes already issued are not rolled back.
    #[instrument(skip_all, fields(run_id = %Uuid::now_v7(), sources = sources.len()))]
    pub async fn run(&self, cancel: &CancellationToken, sources: Vec<String>) -> Result<RunSummary> {
        let start = Instant::now();
        let ctx = RunContext::new(cancel.child_token());
        let _guard = ctx.cancel.clone().drop_guard();

        info!(
            fetch_concurrency = self.config.fetch_concurrency,
            persist_concurrency = self.config.persist_concurrency,
            decode_policy = ?self.config.decode_policy,
            "starting run"
        );

        let (payloads, fetch_errors) = self.load_sources(&ctx, sources)?;
        let (lines, split_errors) = self.split(&ctx, payloads);
        let (products, decode_errors) = self.decode(&ctx, lines);
        let persist_errors = self.save(&ctx, products);

        let merged = merge_errors(
            ctx.cancel.clone(),
            vec![fetch_errors, split_errors, decode_errors, persist_errors],
        );

        if let Err(e) = wait_for_first_error(&ctx.cancel, merged).await {
            warn!(error = %e, elapsed_ms = start.elapsed().as_millis() as u64, "run aborted");
            return Err(e);
        }

        let summary = ctx.summary(start.elapsed());
        info!(
            sources = summary.sources_fetched,
            lines = summary.lines_split,
            stored = summary.records_stored,
            skipped = summary.records_skipped,
            malformed = summary.decode_skipped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run complete"
        );
        self.progress.done(&summary);
        Ok(summary)
    }
}
