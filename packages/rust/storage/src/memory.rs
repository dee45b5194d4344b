//! Process-local identifier cache.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dataflow_shared::{IdCache, Result};

/// In-memory [`IdCache`]. Contents are lost when the process exits, so it
/// only deduplicates within one process lifetime.
#[derive(Default)]
pub struct MemoryIdCache {
    ids: RwLock<HashSet<u32>>,
}

impl MemoryIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached identifiers.
    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }
}

#[async_trait]
impl IdCache for MemoryIdCache {
    async fn exists(&self, id: u32) -> Result<bool> {
        Ok(self.ids.read().await.contains(&id))
    }

    async fn set(&self, id: u32) -> Result<()> {
        self.ids.write().await.insert(id);
        Ok(())
    }
}
