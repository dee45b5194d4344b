//! Cache-gated idempotent write: check, skip or store, then mark.
//!
//! The four steps are not atomic. Two workers holding the same id can both
//! see it absent and both write it; the store's create path is an upsert, so
//! the second write is redundant but harmless. The cache only saves work
//! across runs. It does not provide mutual exclusion within a run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dataflow_shared::{DataflowError, IdCache, Product, ProductStore, Result};

/// What happened to one record in the persist stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written to the store and marked in the cache.
    Stored,
    /// Already cached; no store write was attempted.
    Skipped,
}

/// Writes products through the identifier cache.
#[derive(Clone)]
pub struct CacheGatedWriter {
    cache: Arc<dyn IdCache>,
    store: Arc<dyn ProductStore>,
}

impl CacheGatedWriter {
    pub fn new(cache: Arc<dyn IdCache>, store: Arc<dyn ProductStore>) -> Self {
        Self { cache, store }
    }

    /// Persist one product unless its id is already cached.
    ///
    /// Invalid products are rejected before either collaborator is called.
    /// If the store write succeeds but marking fails, the product is stored
    /// yet uncached; a later run will write it again.
    ///
    /// No collaborator call is started once `cancel` is set.
    pub async fn persist(
        &self,
        product: &Product,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome> {
        product.validate()?;

        ensure_live(cancel)?;
        if self.cache.exists(product.id).await? {
            debug!(id = product.id, "already cached, skipping");
            return Ok(PersistOutcome::Skipped);
        }

        ensure_live(cancel)?;
        self.store.create(product).await?;

        ensure_live(cancel)?;
        if let Err(e) = self.cache.set(product.id).await {
            warn!(id = product.id, error = %e, "stored but not cached");
            return Err(e);
        }

        Ok(PersistOutcome::Stored)
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DataflowError::Cancelled);
    }
    Ok(())
}
