//! Summary ledger
//!
//! One record per import run holding its status and counters. Counters only
//! grow, and only through atomic increments issued while the run is not
//! terminal. Status moves along `pending -> processing -> completed | failed`.

use async_trait::async_trait;
use catalog_common::{ImportStatus, LedgerField};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ImportError, Result};
use crate::models::{ImportRun, UpsertCounts};

#[async_trait]
pub trait SummaryLedger: Send + Sync {
    /// Create a `pending` run with zeroed counters
    async fn create(&self, run_key: &str) -> Result<ImportRun>;

    /// Add every `(field, delta)` pair in one atomic update
    async fn increment_many(&self, run_key: &str, deltas: &[(LedgerField, u64)]) -> Result<()>;

    /// Move the run to `to` if its current status is `to`'s predecessor.
    ///
    /// Moving to `completed` also stamps `completed_at` with `at`.
    async fn transition(&self, run_key: &str, to: ImportStatus, at: DateTime<Utc>) -> Result<()>;

    async fn get(&self, run_key: &str) -> Result<Option<ImportRun>>;

    /// Most recently created run
    async fn latest(&self) -> Result<Option<ImportRun>>;

    async fn increment(&self, run_key: &str, field: LedgerField, delta: u64) -> Result<()> {
        self.increment_many(run_key, &[(field, delta)]).await
    }

    async fn set_status(&self, run_key: &str, status: ImportStatus) -> Result<()> {
        self.transition(run_key, status, Utc::now()).await
    }

    /// Enter a terminal status
    async fn finalize(&self, run_key: &str, status: ImportStatus, at: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() {
            return Err(ImportError::InvalidTransition {
                run_key: run_key.to_string(),
                to: status.to_string(),
                reason: "only completed or failed can finalize a run".to_string(),
            });
        }
        self.transition(run_key, status, at).await
    }
}

/// Error for a status change or increment the ledger refused.
///
/// `current` is the status observed after the refusal, `None` if the run
/// does not exist.
pub fn rejection(run_key: &str, current: Option<ImportStatus>, to: Option<ImportStatus>) -> ImportError {
    match (current, to) {
        (None, _) => ImportError::RunNotFound(run_key.to_string()),
        (Some(status), _) if status.is_terminal() => ImportError::RunTerminal {
            run_key: run_key.to_string(),
            status: status.to_string(),
        },
        (Some(status), Some(to)) => ImportError::InvalidTransition {
            run_key: run_key.to_string(),
            to: to.to_string(),
            reason: format!("run is {}", status),
        },
        (Some(status), None) => ImportError::InvalidTransition {
            run_key: run_key.to_string(),
            to: status.to_string(),
            reason: "counters cannot change in this state".to_string(),
        },
    }
}

/// Ledger view bound to a single run
#[derive(Clone)]
pub struct RunLedger {
    ledger: Arc<dyn SummaryLedger>,
    run_key: String,
}

impl RunLedger {
    pub fn new(ledger: Arc<dyn SummaryLedger>, run_key: impl Into<String>) -> Self {
        Self {
            ledger,
            run_key: run_key.into(),
        }
    }

    pub fn run_key(&self) -> &str {
        &self.run_key
    }

    pub async fn begin(&self) -> Result<()> {
        self.ledger
            .set_status(&self.run_key, ImportStatus::Processing)
            .await
    }

    pub async fn record_valid(&self) -> Result<()> {
        self.ledger
            .increment(&self.run_key, LedgerField::Total, 1)
            .await
    }

    pub async fn record_invalid(&self) -> Result<()> {
        self.ledger
            .increment_many(&self.run_key, &[(LedgerField::Invalid, 1), (LedgerField::Total, 1)])
            .await
    }

    /// Add a committed batch's counts
    pub async fn record_batch(&self, counts: &UpsertCounts) -> Result<()> {
        let deltas: Vec<(LedgerField, u64)> = [
            (LedgerField::Imported, counts.inserted),
            (LedgerField::Updated, counts.updated),
            (LedgerField::Duplicates, counts.duplicates),
        ]
        .into_iter()
        .filter(|(_, delta)| *delta > 0)
        .collect();

        if deltas.is_empty() {
            debug!(run_key = %self.run_key, "Batch changed no counters");
            return Ok(());
        }
        self.ledger.increment_many(&self.run_key, &deltas).await
    }

    pub async fn complete(&self) -> Result<()> {
        self.ledger
            .finalize(&self.run_key, ImportStatus::Completed, Utc::now())
            .await
    }

    pub async fn fail(&self) -> Result<()> {
        self.ledger
            .finalize(&self.run_key, ImportStatus::Failed, Utc::now())
            .await
    }

    pub async fn snapshot(&self) -> Result<ImportRun> {
        self.ledger
            .get(&self.run_key)
            .await?
            .ok_or_else(|| ImportError::RunNotFound(self.run_key.clone()))
    }
}
