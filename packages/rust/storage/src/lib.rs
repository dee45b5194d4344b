//! libSQL storage layer (embedded, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the durable
//! product table and the persistent identifier cache. It implements both
//! [`ProductStore`] and [`IdCache`], so one handle can back both ports.
//! [`MemoryIdCache`] is a process-local alternative for the cache port.

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use dataflow_shared::{DataflowError, IdCache, Product, ProductStore, Result};
use libsql::{Connection, Database, params};

pub use memory::MemoryIdCache;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DataflowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DataflowError::Store(e.to_string()))?;

        Self::from_database(db).await
    }

    /// Open a private in-memory database (tests, dry runs).
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DataflowError::Store(e.to_string()))?;

        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| DataflowError::Store(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DataflowError::Store(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Product operations
    // -----------------------------------------------------------------------

    /// Validate and upsert a product by id.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        product.validate()?;

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO products (id, title, price, category, brand, url, description, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   price = excluded.price,
                   category = excluded.category,
                   brand = excluded.brand,
                   url = excluded.url,
                   description = excluded.description,
                   updated_at = excluded.updated_at",
                params![
                    i64::from(product.id),
                    product.title.as_str(),
                    product.price,
                    product.category.as_str(),
                    product.brand.as_str(),
                    product.url.as_deref(),
                    product.description.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| DataflowError::Store(e.to_string()))?;
        Ok(())
    }

    /// Get a product by id.
    pub async fn get_product(&self, id: u32) -> Result<Option<Product>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, price, category, brand, url, description
                 FROM products WHERE id = ?1",
                params![i64::from(id)],
            )
            .await
            .map_err(|e| DataflowError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_product(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DataflowError::Store(e.to_string())),
        }
    }

    /// Number of stored products.
    pub async fn count_products(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM products", params![])
            .await
            .map_err(|e| DataflowError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n as u64)
                .map_err(|e| DataflowError::Store(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(DataflowError::Store(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Identifier cache operations
    // -----------------------------------------------------------------------

    /// Whether `id` has been marked as seen.
    pub async fn is_seen(&self, id: u32) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM seen_ids WHERE id = ?1", params![i64::from(id)])
            .await
            .map_err(|e| DataflowError::Cache(e.to_string()))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DataflowError::Cache(e.to_string())),
        }
    }

    /// Mark `id` as seen. Marking twice is a no-op.
    pub async fn mark_seen(&self, id: u32) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO seen_ids (id, seen_at) VALUES (?1, ?2)
                 ON CONFLICT(id) DO NOTHING",
                params![i64::from(id), now.as_str()],
            )
            .await
            .map_err(|e| DataflowError::Cache(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for Storage {
    async fn create(&self, product: &Product) -> Result<()> {
        self.upsert_product(product).await
    }

    async fn find_by_id(&self, id: u32) -> Result<Product> {
        self.get_product(id)
            .await?
            .ok_or(DataflowError::NotFound { id })
    }
}

#[async_trait]
impl IdCache for Storage {
    async fn exists(&self, id: u32) -> Result<bool> {
        self.is_seen(id).await
    }

    async fn set(&self, id: u32) -> Result<()> {
        self.mark_seen(id).await
    }
}

/// Convert a database row to a [`Product`].
fn row_to_product(row: &libsql::Row) -> Result<Product> {
    Ok(Product {
        id: row
            .get::<u32>(0)
            .map_err(|e| DataflowError::Store(e.to_string()))?,
        title: row
            .get::<String>(1)
            .map_err(|e| DataflowError::Store(e.to_string()))?,
        price: row
            .get::<f64>(2)
            .map_err(|e| DataflowError::Store(e.to_string()))?,
        category: row
            .get::<String>(3)
            .map_err(|e| DataflowError::Store(e.to_string()))?,
        brand: row
            .get::<String>(4)
            .map_err(|e| DataflowError::Store(e.to_string()))?,
        url: row.get::<String>(5).ok(),
        description: row.get::<String>(6).ok(),
    })
}
