//! In-memory collaborators for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dataflow_shared::{DataflowError, Fetcher, IdCache, Product, ProductStore, Result};

pub(crate) fn product(id: u32) -> Product {
    Product {
        id,
        title: format!("title{id}"),
        price: 42.01,
        category: "bilgisayar".into(),
        brand: format!("brand{id}"),
        url: Some(format!("https://url{id}.com")),
        description: None,
    }
}

/// JSONL payload holding one product per id, newline-terminated.
pub(crate) fn jsonl(ids: impl IntoIterator<Item = u32>) -> Vec<u8> {
    let mut out = Vec::new();
    for id in ids {
        out.extend(serde_json::to_vec(&product(id)).expect("encode product"));
        out.push(b'\n');
    }
    out
}

/// Tracks the current and peak number of concurrent callers.
#[derive(Default)]
pub(crate) struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Serves payloads from a map; unknown ids fail with a retrieval error.
#[derive(Default)]
pub(crate) struct MapFetcher {
    payloads: HashMap<String, Vec<u8>>,
    delay: Duration,
    calls: AtomicUsize,
    pub(crate) gauge: Gauge,
}

impl MapFetcher {
    pub(crate) fn new(payloads: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            payloads: payloads.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn get(&self, source_id: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.exit();
        self.payloads
            .get(source_id)
            .cloned()
            .ok_or_else(|| DataflowError::retrieval(source_id, "no such object"))
    }
}

#[derive(Default)]
pub(crate) struct RecordingCache {
    ids: Mutex<HashSet<u32>>,
    fail_set: bool,
    exists_calls: AtomicUsize,
    set_calls: AtomicUsize,
}

impl RecordingCache {
    pub(crate) fn with_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            ids: Mutex::new(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn failing_set() -> Self {
        Self {
            fail_set: true,
            ..Self::default()
        }
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.ids.lock().unwrap().contains(&id)
    }

    pub(crate) fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdCache for RecordingCache {
    async fn exists(&self, id: u32) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contains(id))
    }

    async fn set(&self, id: u32) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set {
            return Err(DataflowError::Cache("connection refused".into()));
        }
        self.ids.lock().unwrap().insert(id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingStore {
    products: Mutex<HashMap<u32, Product>>,
    fail_ids: HashSet<u32>,
    delay: Duration,
    create_calls: AtomicUsize,
    pub(crate) gauge: Gauge,
}

impl RecordingStore {
    pub(crate) fn failing_on(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            fail_ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.products.lock().unwrap().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.products.lock().unwrap().len()
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductStore for RecordingStore {
    async fn create(&self, product: &Product) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        product.validate()?;
        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.exit();
        if self.fail_ids.contains(&product.id) {
            return Err(DataflowError::Store(format!("write of {} rejected", product.id)));
        }
        self.products
            .lock()
            .unwrap()
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: u32) -> Result<Product> {
        self.products
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(DataflowError::NotFound { id })
    }
}
