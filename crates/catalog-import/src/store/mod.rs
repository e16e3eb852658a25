//! Catalog and ledger storage backends
//!
//! The pipeline talks to storage through two seams:
//!
//! - [`CatalogStore`] / [`CatalogSession`]: the product catalog, written one
//!   transaction per batch
//! - [`SummaryLedger`](crate::import::ledger::SummaryLedger): per-run counters
//!
//! `postgres` is the production backend. `memory` keeps everything in-process
//! and is used by tests and `--memory` dry runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CatalogRecord, ProductRow, UpsertCounts};

pub use memory::{MemoryCatalog, MemoryLedger};
pub use postgres::{PgCatalogStore, PgSummaryLedger};

/// Entry point to the product catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a transaction. Dropping the session without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn CatalogSession>>;

    async fn find(&self, sku: &str) -> Result<Option<CatalogRecord>>;

    async fn count(&self) -> Result<u64>;
}

/// One catalog transaction.
///
/// Every read issued through a session observes the writes made earlier in
/// the same session.
#[async_trait]
pub trait CatalogSession: Send {
    /// Number of `keys` currently present in the catalog
    async fn count_by_keys(&mut self, keys: &[String]) -> Result<u64>;

    /// Number of `keys` present whose `updated_at` equals `stamp`
    async fn count_by_keys_and_timestamp(
        &mut self,
        keys: &[String],
        stamp: DateTime<Utc>,
    ) -> Result<u64>;

    /// Insert-or-update keyed by sku. `rows` must not repeat a sku.
    ///
    /// Returns the combined affected-row count reported by the store.
    async fn upsert_many(&mut self, rows: &[ProductRow], stamp: DateTime<Utc>) -> Result<u64>;

    /// Same write as [`upsert_many`](Self::upsert_many), reporting per-row
    /// outcomes.
    ///
    /// Stores that cannot tell inserts from updates return `Ok(None)` without
    /// writing anything.
    async fn upsert_many_with_outcome(
        &mut self,
        _rows: &[ProductRow],
        _stamp: DateTime<Utc>,
    ) -> Result<Option<UpsertCounts>> {
        Ok(None)
    }

    async fn commit(self: Box<Self>) -> Result<()>;
}
