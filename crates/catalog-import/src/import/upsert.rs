//! Batch upsert with insert/update reconciliation
//!
//! Each batch is written in one catalog transaction. How many rows were
//! created versus overwritten is derived either from the store's per-row
//! outcome ([`ReconcileStrategy::Native`]) or from key-existence counts taken
//! around the write ([`ReconcileStrategy::Existence`]).
//!
//! Rows sharing a sku inside one batch are collapsed before the write: the
//! last row wins and takes the position of the first occurrence. Collapsed
//! rows are reported as `duplicates`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{ImportError, Result};
use crate::models::{ProductRow, UpsertCounts};
use crate::store::{CatalogSession, CatalogStore};

/// How inserted and updated counts are derived for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStrategy {
    /// Ask the store for per-row outcomes; fall back to `Existence` when the
    /// store cannot report them
    #[default]
    Native,
    /// Count matching keys before and after the write
    Existence,
}

impl ReconcileStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStrategy::Native => "native",
            ReconcileStrategy::Existence => "existence",
        }
    }
}

impl std::fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReconcileStrategy {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "native" => Ok(ReconcileStrategy::Native),
            "existence" => Ok(ReconcileStrategy::Existence),
            other => Err(ImportError::Config(format!(
                "Unknown reconcile strategy '{}', expected 'native' or 'existence'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn CatalogStore>,
    strategy: ReconcileStrategy,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn CatalogStore>, strategy: ReconcileStrategy) -> Self {
        Self { store, strategy }
    }

    pub fn strategy(&self) -> ReconcileStrategy {
        self.strategy
    }

    /// Write `batch` in one transaction and report what it did.
    ///
    /// Nothing is committed unless the write and every reconciliation read
    /// succeed. An empty batch opens no transaction.
    #[instrument(skip_all, fields(rows = batch.len(), strategy = %self.strategy))]
    pub async fn apply(&self, batch: &[ProductRow]) -> Result<UpsertCounts> {
        if batch.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let (rows, duplicates) = collapse_duplicates(batch);
        let keys: Vec<String> = rows.iter().map(|row| row.sku.clone()).collect();

        // Postgres keeps microseconds; the stamp must compare equal after a round trip.
        let stamp = Utc::now().trunc_subsecs(6);

        let mut session = self.store.begin().await?;

        let mut counts = match self.strategy {
            ReconcileStrategy::Native => {
                match session.upsert_many_with_outcome(&rows, stamp).await? {
                    Some(counts) => counts,
                    None => {
                        debug!("Store reports no per-row outcome, counting by existence");
                        reconcile_by_existence(session.as_mut(), &rows, &keys, stamp).await?
                    },
                }
            },
            ReconcileStrategy::Existence => {
                reconcile_by_existence(session.as_mut(), &rows, &keys, stamp).await?
            },
        };
        counts.duplicates = duplicates;

        session.commit().await?;

        debug!(
            inserted = counts.inserted,
            updated = counts.updated,
            duplicates = counts.duplicates,
            "Batch committed"
        );

        Ok(counts)
    }
}

async fn reconcile_by_existence(
    session: &mut dyn CatalogSession,
    rows: &[ProductRow],
    keys: &[String],
    stamp: DateTime<Utc>,
) -> Result<UpsertCounts> {
    let before = session.count_by_keys(keys).await?;
    let affected = session.upsert_many(rows, stamp).await?;
    let after = session.count_by_keys(keys).await?;
    let touched = session.count_by_keys_and_timestamp(keys, stamp).await?;

    let inserted = after.saturating_sub(before);
    let updated = touched.saturating_sub(inserted);

    if touched != rows.len() as u64 {
        warn!(
            expected = rows.len(),
            touched,
            "Rows carrying this batch's timestamp do not match the batch size"
        );
    }
    debug!(before, after, affected, "Existence counts");

    Ok(UpsertCounts {
        inserted,
        updated,
        duplicates: 0,
    })
}

/// Keep one row per sku: the last one, at the first one's position.
///
/// Returns the surviving rows and how many were dropped.
pub fn collapse_duplicates(batch: &[ProductRow]) -> (Vec<ProductRow>, u64) {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(batch.len());
    let mut rows: Vec<ProductRow> = Vec::with_capacity(batch.len());

    for row in batch {
        match positions.get(row.sku.as_str()) {
            Some(&index) => rows[index] = row.clone(),
            None => {
                positions.insert(row.sku.as_str(), rows.len());
                rows.push(row.clone());
            },
        }
    }

    let duplicates = (batch.len() - rows.len()) as u64;
    (rows, duplicates)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryCatalog;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn product(sku: &str, name: &str, price: &str) -> ProductRow {
        ProductRow {
            sku: sku.to_string(),
            name: name.to_string(),
            description: String::new(),
            price: BigDecimal::from_str(price).unwrap(),
            line: 0,
        }
    }

    #[test]
    fn test_collapse_keeps_last_row_at_first_position() {
        let batch = vec![
            product("A", "first", "1"),
            product("B", "only", "2"),
            product("A", "second", "3"),
        ];

        let (rows, duplicates) = collapse_duplicates(&batch);

        assert_eq!(duplicates, 1);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sku, "A");
        assert_eq!(rows[0].name, "second");
        assert_eq!(rows[1].sku, "B");
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("native".parse::<ReconcileStrategy>().unwrap(), ReconcileStrategy::Native);
        assert_eq!(" Existence ".parse::<ReconcileStrategy>().unwrap(), ReconcileStrategy::Existence);
        assert!("affected-rows".parse::<ReconcileStrategy>().is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let catalog = Arc::new(MemoryCatalog::new());
        let engine = UpsertEngine::new(catalog.clone(), ReconcileStrategy::Existence);

        let counts = engine.apply(&[]).await.unwrap();

        assert_eq!(counts, UpsertCounts::default());
        assert!(catalog.upsert_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_inserts_then_updates() {
        for strategy in [ReconcileStrategy::Native, ReconcileStrategy::Existence] {
            let catalog = Arc::new(MemoryCatalog::new());
            let engine = UpsertEngine::new(catalog.clone(), strategy);

            let first = engine
                .apply(&[product("A", "a", "1"), product("B", "b", "2")])
                .await
                .unwrap();
            assert_eq!(first, UpsertCounts { inserted: 2, updated: 0, duplicates: 0 });

            let second = engine
                .apply(&[product("B", "b2", "2.50"), product("C", "c", "3")])
                .await
                .unwrap();
            assert_eq!(second, UpsertCounts { inserted: 1, updated: 1, duplicates: 0 });

            let b = catalog.find("B").await.unwrap().unwrap();
            assert_eq!(b.name, "b2");
            assert_eq!(catalog.count().await.unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn test_native_falls_back_when_store_cannot_report() {
        let catalog = Arc::new(MemoryCatalog::without_native_outcome());
        let engine = UpsertEngine::new(catalog.clone(), ReconcileStrategy::Native);

        engine.apply(&[product("A", "a", "1")]).await.unwrap();
        let counts = engine
            .apply(&[product("A", "a", "1"), product("B", "b", "1")])
            .await
            .unwrap();

        assert_eq!(counts, UpsertCounts { inserted: 1, updated: 1, duplicates: 0 });
    }

    #[tokio::test]
    async fn test_duplicates_in_batch_are_counted() {
        let catalog = Arc::new(MemoryCatalog::new());
        let engine = UpsertEngine::new(catalog.clone(), ReconcileStrategy::Existence);

        let counts = engine
            .apply(&[
                product("A", "a", "1"),
                product("A", "a-late", "9"),
                product("B", "b", "2"),
            ])
            .await
            .unwrap();

        assert_eq!(counts, UpsertCounts { inserted: 2, updated: 0, duplicates: 1 });
        assert_eq!(catalog.find("A").await.unwrap().unwrap().name, "a-late");
        assert_eq!(catalog.upsert_calls().await, vec![2]);
    }

    #[tokio::test]
    async fn test_failed_write_commits_nothing() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.fail_upserts_after(0);
        let engine = UpsertEngine::new(catalog.clone(), ReconcileStrategy::Native);

        let result = engine.apply(&[product("A", "a", "1")]).await;

        assert!(result.is_err());
        assert_eq!(catalog.count().await.unwrap(), 0);
    }
}
