//! Import run orchestration
//!
//! Drives one run from `pending` to a terminal status:
//!
//! 1. mark the run `processing`
//! 2. stream rows: invalid ones are counted, valid ones are counted and
//!    buffered
//! 3. upsert each full buffer, then the remainder, adding every committed
//!    batch's counts to the ledger
//! 4. mark the run `completed`, or `failed` on the first fatal error
//!
//! Counters are written as rows are seen, so the ledger shows progress while
//! the run is still going. A failed run keeps the counts of everything
//! committed before the failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::accumulator::{AddOutcome, Batch, BatchAccumulator};
use super::ledger::{RunLedger, SummaryLedger};
use super::reader::{CsvRowSource, RowSource};
use super::upsert::UpsertEngine;
use super::validator::{RowValidator, Validation};
use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::models::ImportReport;
use crate::store::CatalogStore;

#[derive(Clone)]
pub struct ImportOrchestrator {
    ledger: Arc<dyn SummaryLedger>,
    engine: UpsertEngine,
    validator: RowValidator,
    batch_size: usize,
    delimiter: u8,
}

impl ImportOrchestrator {
    pub fn new(
        config: &ImportConfig,
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn SummaryLedger>,
    ) -> Self {
        Self {
            ledger,
            engine: UpsertEngine::new(catalog, config.reconcile),
            validator: RowValidator::new(&config.required_columns),
            batch_size: config.batch_size,
            delimiter: config.delimiter,
        }
    }

    /// Run `run_key` over the delimited file at `path`.
    ///
    /// The file is opened after the run enters `processing`, so an
    /// unreadable file still leaves a `failed` run behind.
    #[instrument(skip_all, fields(run_key = %run_key, path = %path.display()))]
    pub async fn run_file(&self, run_key: &str, path: &Path) -> Result<ImportReport> {
        let started = Instant::now();
        let run = self.begin(run_key).await?;

        let outcome = match CsvRowSource::open(path, self.delimiter).await {
            Ok(mut source) => self.process(&run, &mut source).await,
            Err(e) => Err(e),
        };

        self.finish(&run, outcome, started).await
    }

    /// Run `run_key` over an already-open source
    #[instrument(skip_all, fields(run_key = %run_key))]
    pub async fn run<S>(&self, run_key: &str, source: &mut S) -> Result<ImportReport>
    where
        S: RowSource + ?Sized,
    {
        let started = Instant::now();
        let run = self.begin(run_key).await?;
        let outcome = self.process(&run, source).await;
        self.finish(&run, outcome, started).await
    }

    /// Refusal here means another worker owns the run or it already ended;
    /// the run is left untouched.
    async fn begin(&self, run_key: &str) -> Result<RunLedger> {
        let run = RunLedger::new(self.ledger.clone(), run_key);
        run.begin().await?;
        info!(reconcile = %self.engine.strategy(), "Import run {} processing", run_key);
        Ok(run)
    }

    /// Stream, validate and upsert everything; returns the batch count
    async fn process<S>(&self, run: &RunLedger, source: &mut S) -> Result<u64>
    where
        S: RowSource + ?Sized,
    {
        let mut accumulator = BatchAccumulator::new(self.batch_size);
        let mut batches = 0u64;

        while let Some(row) = source.next_row().await? {
            match self.validator.validate(&row) {
                Validation::Invalid(reason) => {
                    debug!(line = row.line, %reason, "Row rejected");
                    run.record_invalid().await?;
                },
                Validation::Valid(product) => {
                    run.record_valid().await?;
                    if accumulator.add(product) == AddOutcome::BatchReady {
                        batches += 1;
                        self.apply_batch(run, batches, accumulator.flush()).await?;
                    }
                },
            }
        }

        if !accumulator.is_empty() {
            batches += 1;
            self.apply_batch(run, batches, accumulator.flush()).await?;
        }

        debug!(rows = source.rows_read(), batches, "Input exhausted");
        Ok(batches)
    }

    async fn apply_batch(&self, run: &RunLedger, number: u64, batch: Batch) -> Result<()> {
        let counts = self
            .engine
            .apply(&batch)
            .await
            .map_err(|e| ImportError::upsert_commit(number, batch.len(), e))?;

        run.record_batch(&counts).await?;

        info!(
            batch = number,
            rows = batch.len(),
            inserted = counts.inserted,
            updated = counts.updated,
            duplicates = counts.duplicates,
            "Batch applied"
        );
        Ok(())
    }

    async fn finish(
        &self,
        run: &RunLedger,
        outcome: Result<u64>,
        started: Instant,
    ) -> Result<ImportReport> {
        let outcome = match outcome {
            Ok(batches) => run.complete().await.map(|_| batches),
            Err(e) => Err(e),
        };

        let batches = match outcome {
            Ok(batches) => batches,
            Err(e) => {
                error!("Import run {} failed: {}", run.run_key(), e);
                if let Err(mark_err) = run.fail().await {
                    warn!("Could not mark run {} failed: {}", run.run_key(), mark_err);
                }
                return Err(e);
            },
        };

        let snapshot = run.snapshot().await?;
        let duration_secs = started.elapsed().as_secs_f64();

        info!(
            total = snapshot.total_count,
            imported = snapshot.imported_count,
            updated = snapshot.updated_count,
            invalid = snapshot.invalid_count,
            duplicates = snapshot.duplicates_count,
            batches,
            "Import run {} completed in {:.2}s",
            run.run_key(),
            duration_secs
        );

        Ok(ImportReport {
            run: snapshot,
            batches,
            duration_secs,
        })
    }
}
