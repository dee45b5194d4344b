//! The four pipeline stages.
//!
//! Each stage spawns its own task, reads from the previous stage's channel
//! and returns its output channel together with its error channel. A
//! stage's error channel closes only after every task it started has
//! finished, which is what lets the fan-in treat a full close as success.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use dataflow_shared::{DataflowError, DecodePolicy, Product, Result};

use crate::fan_in::{ERROR_BUFFER, ErrorStream};
use crate::persist::PersistOutcome;
use crate::pipeline::{Pipeline, RunContext, RunCounters};

impl Pipeline {
    /// Fetch stage: retrieve every source, at most `fetch_concurrency` at a
    /// time.
    ///
    /// A failed retrieval is reported on the error channel; siblings keep
    /// going. The payload channel closes once every retrieval has finished.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub fn load_sources(
        &self,
        ctx: &RunContext,
        sources: Vec<String>,
    ) -> Result<(mpsc::Receiver<Vec<u8>>, ErrorStream)> {
        if sources.is_empty() {
            return Err(DataflowError::Input);
        }

        let (out_tx, out_rx) = mpsc::channel(self.config.channel_capacity);
        let (err_tx, err_rx) = mpsc::channel(ERROR_BUFFER);
        let permits = Arc::new(Semaphore::new(self.config.fetch_concurrency));
        let fetcher = Arc::clone(&self.fetcher);
        let progress = Arc::clone(&self.progress);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            for source_id in sources {
                let permit = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => break,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                while let Some(joined) = tasks.try_join_next() {
                    report_join_failure(&ctx.cancel, &err_tx, joined, fetch_task_failed).await;
                }

                let fetcher = Arc::clone(&fetcher);
                let progress = Arc::clone(&progress);
                let out_tx = out_tx.clone();
                let err_tx = err_tx.clone();
                let ctx = ctx.clone();

                tasks.spawn(async move {
                    let fetched = tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => return,
                        fetched = fetcher.get(&source_id) => fetched,
                    };
                    drop(permit);

                    match fetched {
                        Ok(payload) => {
                            debug!(source_id = %source_id, bytes = payload.len(), "source fetched");
                            RunCounters::bump(&ctx.counters.sources_fetched);
                            progress.source_fetched(&source_id, payload.len());
                            send(&ctx.cancel, &out_tx, payload).await;
                        }
                        Err(e) => {
                            warn!(source_id = %source_id, error = %e, "fetch failed");
                            send(&ctx.cancel, &err_tx, e).await;
                        }
                    }
                });
            }

            while let Some(joined) = tasks.join_next().await {
                report_join_failure(&ctx.cancel, &err_tx, joined, fetch_task_failed).await;
            }
        });

        Ok((out_rx, err_rx))
    }

    /// Split stage: one line per non-empty newline-delimited segment, in
    /// payload order.
    #[instrument(skip_all)]
    pub fn split(
        &self,
        ctx: &RunContext,
        mut payloads: mpsc::Receiver<Vec<u8>>,
    ) -> (mpsc::Receiver<String>, ErrorStream) {
        let (out_tx, out_rx) = mpsc::channel(self.config.channel_capacity);
        let (err_tx, err_rx) = mpsc::channel::<DataflowError>(ERROR_BUFFER);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            // Splitting cannot fail; the sender only marks the stage as live.
            let _err_tx = err_tx;

            while let Some(payload) = recv(&ctx.cancel, &mut payloads).await {
                for line in split_lines(&payload) {
                    RunCounters::bump(&ctx.counters.lines_split);
                    if !send(&ctx.cancel, &out_tx, line).await {
                        return;
                    }
                }
            }
        });

        (out_rx, err_rx)
    }

    /// Decode stage: parse each line as a [`Product`].
    ///
    /// A malformed line is always dropped. Under [`DecodePolicy::Abort`] it
    /// is also reported on the error channel.
    #[instrument(skip_all, fields(policy = ?self.config.decode_policy))]
    pub fn decode(
        &self,
        ctx: &RunContext,
        mut lines: mpsc::Receiver<String>,
    ) -> (mpsc::Receiver<Product>, ErrorStream) {
        let (out_tx, out_rx) = mpsc::channel(self.config.channel_capacity);
        let (err_tx, err_rx) = mpsc::channel(ERROR_BUFFER);
        let policy = self.config.decode_policy;
        let ctx = ctx.clone();

        tokio::spawn(async move {
            while let Some(line) = recv(&ctx.cancel, &mut lines).await {
                match serde_json::from_str::<Product>(&line) {
                    Ok(product) => {
                        RunCounters::bump(&ctx.counters.records_decoded);
                        if !send(&ctx.cancel, &out_tx, product).await {
                            return;
                        }
                    }
                    Err(e) => match policy {
                        DecodePolicy::Skip => {
                            RunCounters::bump(&ctx.counters.decode_skipped);
                            warn!(error = %e, "dropping malformed line");
                        }
                        DecodePolicy::Abort => {
                            if !send(&ctx.cancel, &err_tx, DataflowError::decode(e.to_string())).await {
                                return;
                            }
                        }
                    },
                }
            }
        });

        (out_rx, err_rx)
    }

    /// Persist stage: cache-gated write of every product, at most
    /// `persist_concurrency` at a time.
    ///
    /// This stage has no data output. Its error channel closes once every
    /// received product has been skipped, stored, or has failed.
    #[instrument(skip_all)]
    pub fn save(&self, ctx: &RunContext, mut products: mpsc::Receiver<Product>) -> ErrorStream {
        let (err_tx, err_rx) = mpsc::channel(ERROR_BUFFER);
        let permits = Arc::new(Semaphore::new(self.config.persist_concurrency));
        let writer = self.writer.clone();
        let progress = Arc::clone(&self.progress);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            while let Some(product) = recv(&ctx.cancel, &mut products).await {
                let permit = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => break,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                while let Some(joined) = tasks.try_join_next() {
                    report_join_failure(&ctx.cancel, &err_tx, joined, persist_task_failed).await;
                }

                let writer = writer.clone();
                let progress = Arc::clone(&progress);
                let err_tx = err_tx.clone();
                let ctx = ctx.clone();

                tasks.spawn(async move {
                    let outcome = writer.persist(&product, &ctx.cancel).await;
                    drop(permit);

                    match outcome {
                        Ok(outcome) => {
                            let counter = match outcome {
                                PersistOutcome::Stored => &ctx.counters.records_stored,
                                PersistOutcome::Skipped => &ctx.counters.records_skipped,
                            };
                            RunCounters::bump(counter);
                            progress.record_persisted(product.id, outcome);
                        }
                        Err(DataflowError::Cancelled) => {}
                        Err(e) => {
                            warn!(id = product.id, error = %e, "persist failed");
                            send(&ctx.cancel, &err_tx, e).await;
                        }
                    }
                });
            }

            while let Some(joined) = tasks.join_next().await {
                report_join_failure(&ctx.cancel, &err_tx, joined, persist_task_failed).await;
            }
        });

        err_rx
    }
}

/// Split a payload on `\n`, dropping empty segments and a trailing `\r`.
/// Invalid UTF-8 is replaced, not rejected.
pub fn split_lines(payload: &[u8]) -> impl Iterator<Item = String> + '_ {
    payload
        .split(|b| *b == b'\n')
        .map(|segment| segment.strip_suffix(b"\r").unwrap_or(segment))
        .filter(|segment| !segment.is_empty())
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
}

/// Send unless the run is cancelled. Returns `false` if the value was not
/// delivered.
async fn send<T>(cancel: &CancellationToken, tx: &mpsc::Sender<T>, value: T) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}

/// Receive unless the run is cancelled.
async fn recv<T>(cancel: &CancellationToken, rx: &mut mpsc::Receiver<T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        next = rx.recv() => next,
    }
}

/// Surface a panicked stage task as an error on the stage's channel.
async fn report_join_failure(
    cancel: &CancellationToken,
    err_tx: &mpsc::Sender<DataflowError>,
    joined: std::result::Result<(), JoinError>,
    to_error: fn(String) -> DataflowError,
) {
    match joined {
        Err(e) if !e.is_cancelled() => {
            send(cancel, err_tx, to_error(e.to_string())).await;
        }
        _ => {}
    }
}

fn fetch_task_failed(message: String) -> DataflowError {
    DataflowError::retrieval("unknown", format!("fetch task failed: {message}"))
}

fn persist_task_failed(message: String) -> DataflowError {
    DataflowError::Store(format!("persist task failed: {message}"))
}
