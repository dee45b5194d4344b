//! Core pipeline for dataflow.
//!
//! Moves product records from named sources into the durable store in four
//! channel-connected stages (fetch, split, decode, persist), fans the
//! stages' error channels into one stream, and ends the run on the first
//! error.

pub mod fan_in;
pub mod persist;
pub mod pipeline;
pub mod stages;

#[cfg(test)]
pub(crate) mod testkit;

pub use fan_in::{ErrorStream, merge_errors, wait_for_first_error};
pub use persist::{CacheGatedWriter, PersistOutcome};
pub use pipeline::{
    Pipeline, PipelineConfig, ProgressReporter, RunContext, RunSummary, SilentProgress,
};
pub use stages::split_lines;

pub use dataflow_shared::DecodePolicy;
pub use tokio_util::sync::CancellationToken;
