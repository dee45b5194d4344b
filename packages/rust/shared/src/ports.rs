//! Collaborator ports consumed by the pipeline.
//!
//! Each trait is the minimal contract the pipeline needs from an external
//! system. Implementations live in `dataflow-fetch` and `dataflow-storage`;
//! tests substitute in-memory doubles.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Product;

/// Retrieves the raw bytes of a named source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download the whole payload for `source_id`.
    ///
    /// Fails with [`DataflowError::Retrieval`](crate::DataflowError::Retrieval).
    async fn get(&self, source_id: &str) -> Result<Vec<u8>>;
}

/// Presence cache of product identifiers that are already stored.
///
/// Only membership is meaningful; there is no value payload and no TTL.
#[async_trait]
pub trait IdCache: Send + Sync {
    async fn exists(&self, id: u32) -> Result<bool>;

    async fn set(&self, id: u32) -> Result<()>;
}

/// Durable product store.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Validate and write a product. Writes should behave as an upsert so
    /// that a repeated write of the same identifier is harmless.
    async fn create(&self, product: &Product) -> Result<()>;

    /// Point lookup. Fails with [`DataflowError::NotFound`](crate::DataflowError::NotFound)
    /// on a miss.
    async fn find_by_id(&self, id: u32) -> Result<Product>;
}
