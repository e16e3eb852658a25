//! In-process catalog and ledger
//!
//! A catalog session holds the catalog lock for its whole lifetime, so
//! sessions are serialized and reads inside a session see its own staged
//! writes. Staged writes are merged on commit and discarded on drop.

use async_trait::async_trait;
use catalog_common::{ImportStatus, LedgerField};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{CatalogSession, CatalogStore};
use crate::error::{ImportError, Result};
use crate::import::ledger::{rejection, SummaryLedger};
use crate::models::{CatalogRecord, ImportRun, ProductRow, UpsertCounts};

type Records = HashMap<String, CatalogRecord>;

struct UpsertTracker {
    /// Row count of every successful upsert, in call order
    calls: Mutex<Vec<usize>>,
    /// Successful upserts allowed before every further one fails
    fail_after: AtomicU64,
}

pub struct MemoryCatalog {
    records: Arc<Mutex<Records>>,
    tracker: Arc<UpsertTracker>,
    native_outcome: bool,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            tracker: Arc::new(UpsertTracker {
                calls: Mutex::new(Vec::new()),
                fail_after: AtomicU64::new(u64::MAX),
            }),
            native_outcome: true,
        }
    }

    /// A catalog that cannot tell inserts from updates on its own
    pub fn without_native_outcome() -> Self {
        Self {
            native_outcome: false,
            ..Self::new()
        }
    }

    /// Let `successes` more upserts through, then fail every one after
    pub fn fail_upserts_after(&self, successes: u64) {
        let done = self.tracker.calls.try_lock().map(|c| c.len() as u64).unwrap_or(0);
        self.tracker
            .fail_after
            .store(done.saturating_add(successes), Ordering::SeqCst);
    }

    /// Row counts of the upserts applied so far
    pub async fn upsert_calls(&self) -> Vec<usize> {
        self.tracker.calls.lock().await.clone()
    }

    pub async fn records(&self) -> Vec<CatalogRecord> {
        let mut records: Vec<CatalogRecord> = self.records.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.sku.cmp(&b.sku));
        records
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogSession>> {
        let committed = self.records.clone().lock_owned().await;
        Ok(Box::new(MemoryCatalogSession {
            committed,
            staged: HashMap::new(),
            tracker: self.tracker.clone(),
            native_outcome: self.native_outcome,
        }))
    }

    async fn find(&self, sku: &str) -> Result<Option<CatalogRecord>> {
        Ok(self.records.lock().await.get(sku).cloned())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.lock().await.len() as u64)
    }
}

pub struct MemoryCatalogSession {
    committed: OwnedMutexGuard<Records>,
    staged: Records,
    tracker: Arc<UpsertTracker>,
    native_outcome: bool,
}

impl MemoryCatalogSession {
    fn lookup(&self, sku: &str) -> Option<&CatalogRecord> {
        self.staged.get(sku).or_else(|| self.committed.get(sku))
    }

    async fn write(&mut self, rows: &[ProductRow], stamp: DateTime<Utc>) -> Result<UpsertCounts> {
        let tracker = self.tracker.clone();
        let mut calls = tracker.calls.lock().await;
        if calls.len() as u64 >= tracker.fail_after.load(Ordering::SeqCst) {
            return Err(ImportError::Store("injected upsert failure".to_string()));
        }

        let mut counts = UpsertCounts::default();
        for row in rows {
            let created_at = match self.lookup(&row.sku) {
                Some(existing) => {
                    counts.updated += 1;
                    existing.created_at
                },
                None => {
                    counts.inserted += 1;
                    stamp
                },
            };
            self.staged.insert(
                row.sku.clone(),
                CatalogRecord {
                    sku: row.sku.clone(),
                    name: row.name.clone(),
                    description: row.description.clone(),
                    price: row.price.clone(),
                    created_at,
                    updated_at: stamp,
                },
            );
        }

        calls.push(rows.len());
        Ok(counts)
    }
}

#[async_trait]
impl CatalogSession for MemoryCatalogSession {
    async fn count_by_keys(&mut self, keys: &[String]) -> Result<u64> {
        Ok(keys.iter().filter(|k| self.lookup(k).is_some()).count() as u64)
    }

    async fn count_by_keys_and_timestamp(
        &mut self,
        keys: &[String],
        stamp: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(keys
            .iter()
            .filter(|k| self.lookup(k).is_some_and(|r| r.updated_at == stamp))
            .count() as u64)
    }

    async fn upsert_many(&mut self, rows: &[ProductRow], stamp: DateTime<Utc>) -> Result<u64> {
        self.write(rows, stamp).await?;
        Ok(rows.len() as u64)
    }

    async fn upsert_many_with_outcome(
        &mut self,
        rows: &[ProductRow],
        stamp: DateTime<Utc>,
    ) -> Result<Option<UpsertCounts>> {
        if !self.native_outcome {
            return Ok(None);
        }
        self.write(rows, stamp).await.map(Some)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryCatalogSession {
            mut committed,
            staged,
            ..
        } = *self;
        committed.extend(staged);
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    runs: HashMap<String, ImportRun>,
    /// Keys in creation order
    order: Vec<String>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryLedger for MemoryLedger {
    async fn create(&self, run_key: &str) -> Result<ImportRun> {
        let mut state = self.state.lock().await;
        if state.runs.contains_key(run_key) {
            return Err(ImportError::DuplicateRun(run_key.to_string()));
        }

        let run = ImportRun::pending(run_key, Utc::now());
        state.runs.insert(run_key.to_string(), run.clone());
        state.order.push(run_key.to_string());
        Ok(run)
    }

    async fn increment_many(&self, run_key: &str, deltas: &[(LedgerField, u64)]) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = match state.runs.get_mut(run_key) {
            Some(run) if !run.is_terminal() => run,
            other => return Err(rejection(run_key, other.map(|r| r.status), None)),
        };

        // Work on a copy so a rejected delta leaves every counter untouched
        let mut next = run.clone();
        for (field, delta) in deltas {
            let counter = match field {
                LedgerField::Total => &mut next.total_count,
                LedgerField::Imported => &mut next.imported_count,
                LedgerField::Updated => &mut next.updated_count,
                LedgerField::Invalid => &mut next.invalid_count,
                LedgerField::Duplicates => &mut next.duplicates_count,
            };
            let current = *counter;
            *counter = i64::try_from(*delta)
                .ok()
                .and_then(|delta| current.checked_add(delta))
                .ok_or_else(|| ImportError::Store(format!("{} delta {} out of range", field, delta)))?;
        }
        next.updated_at = Utc::now();
        *run = next;
        Ok(())
    }

    async fn transition(&self, run_key: &str, to: ImportStatus, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = match state.runs.get_mut(run_key) {
            Some(run) if run.status.check_transition(to).is_ok() => run,
            other => return Err(rejection(run_key, other.map(|r| r.status), Some(to))),
        };

        run.status = to;
        run.updated_at = at;
        if to == ImportStatus::Completed {
            run.completed_at = Some(at);
        }
        Ok(())
    }

    async fn get(&self, run_key: &str) -> Result<Option<ImportRun>> {
        Ok(self.state.lock().await.runs.get(run_key).cloned())
    }

    async fn latest(&self) -> Result<Option<ImportRun>> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .last()
            .and_then(|key| state.runs.get(key))
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn product(sku: &str) -> ProductRow {
        ProductRow {
            sku: sku.to_string(),
            name: "n".to_string(),
            description: String::new(),
            price: BigDecimal::from(1),
            line: 0,
        }
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back() {
        let catalog = MemoryCatalog::new();
        {
            let mut session = catalog.begin().await.unwrap();
            session.upsert_many(&[product("A")], Utc::now()).await.unwrap();
            assert_eq!(session.count_by_keys(&["A".to_string()]).await.unwrap(), 1);
        }
        assert_eq!(catalog.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let catalog = MemoryCatalog::new();
        let mut session = catalog.begin().await.unwrap();
        session.upsert_many(&[product("A"), product("B")], Utc::now()).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(catalog.count().await.unwrap(), 2);
        assert_eq!(catalog.upsert_calls().await, vec![2]);
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let catalog = MemoryCatalog::new();
        let first = Utc::now();

        let mut session = catalog.begin().await.unwrap();
        session.upsert_many(&[product("A")], first).await.unwrap();
        session.commit().await.unwrap();

        let later = first + chrono::Duration::seconds(5);
        let mut session = catalog.begin().await.unwrap();
        let counts = session
            .upsert_many_with_outcome(&[product("A")], later)
            .await
            .unwrap()
            .unwrap();
        session.commit().await.unwrap();

        assert_eq!(counts, UpsertCounts { inserted: 0, updated: 1, duplicates: 0 });
        let record = catalog.find("A").await.unwrap().unwrap();
        assert_eq!(record.created_at, first);
        assert_eq!(record.updated_at, later);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let catalog = MemoryCatalog::new();
        catalog.fail_upserts_after(1);

        let mut session = catalog.begin().await.unwrap();
        assert!(session.upsert_many(&[product("A")], Utc::now()).await.is_ok());
        assert!(session.upsert_many(&[product("B")], Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_delta_is_rejected() {
        let ledger = MemoryLedger::new();
        ledger.create("run-1").await.unwrap();
        ledger.set_status("run-1", ImportStatus::Processing).await.unwrap();
        ledger.increment("run-1", LedgerField::Total, 3).await.unwrap();

        let err = ledger
            .increment_many(
                "run-1",
                &[(LedgerField::Invalid, 1), (LedgerField::Total, u64::MAX)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Store(_)));

        let run = ledger.get("run-1").await.unwrap().unwrap();
        assert_eq!(run.total_count, 3);
        assert_eq!(run.invalid_count, 0);
    }
}
