//! Import entry points
//!
//! `start_import` registers a run and hands the work to a background task,
//! returning the run key at once; callers poll the ledger with `get_run`.
//! `run_import` does the same work inline.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use super::ledger::SummaryLedger;
use super::orchestrator::ImportOrchestrator;
use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::models::{ImportReport, ImportRun};
use crate::store::CatalogStore;

/// A run dispatched to the background
pub struct ImportHandle {
    pub run_key: String,
    pub task: JoinHandle<Result<ImportReport>>,
}

impl ImportHandle {
    /// Wait for the background task to finish
    pub async fn wait(self) -> Result<ImportReport> {
        self.task
            .await
            .map_err(|e| ImportError::Store(format!("import task for {} aborted: {}", self.run_key, e)))?
    }
}

#[derive(Clone)]
pub struct ImportService {
    orchestrator: ImportOrchestrator,
    ledger: Arc<dyn SummaryLedger>,
}

impl ImportService {
    pub fn new(
        config: &ImportConfig,
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn SummaryLedger>,
    ) -> Self {
        Self {
            orchestrator: ImportOrchestrator::new(config, catalog, ledger.clone()),
            ledger,
        }
    }

    /// `import-<unix seconds>-<32 hex chars>`
    pub fn new_run_key() -> String {
        format!("import-{}-{}", Utc::now().timestamp(), Uuid::new_v4().simple())
    }

    /// Register a `pending` run
    pub async fn create_run(&self) -> Result<ImportRun> {
        let run = self.ledger.create(&Self::new_run_key()).await?;
        info!("Import run {} created", run.key);
        Ok(run)
    }

    /// Register a run and process `path` on a background task
    pub async fn start_import(&self, path: impl Into<PathBuf>) -> Result<ImportHandle> {
        let path = path.into();
        let run = self.create_run().await?;
        let run_key = run.key.clone();

        let orchestrator = self.orchestrator.clone();
        let task_key = run_key.clone();
        let task = tokio::spawn(async move {
            let result = orchestrator.run_file(&task_key, &path).await;
            if let Err(e) = &result {
                error!("Background import {} ended with error: {}", task_key, e);
            }
            result
        });

        info!("Import run {} dispatched", run_key);
        Ok(ImportHandle { run_key, task })
    }

    /// Register a run and process `path` before returning
    pub async fn run_import(&self, path: &Path) -> Result<ImportReport> {
        let run = self.create_run().await?;
        self.orchestrator.run_file(&run.key, path).await
    }

    /// Process an existing `pending` run
    pub async fn execute(&self, run_key: &str, path: &Path) -> Result<ImportReport> {
        self.orchestrator.run_file(run_key, path).await
    }

    pub fn orchestrator(&self) -> &ImportOrchestrator {
        &self.orchestrator
    }

    pub async fn get_run(&self, run_key: &str) -> Result<ImportRun> {
        self.ledger
            .get(run_key)
            .await?
            .ok_or_else(|| ImportError::RunNotFound(run_key.to_string()))
    }

    pub async fn latest_run(&self) -> Result<Option<ImportRun>> {
        self.ledger.latest().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{MemoryCatalog, MemoryLedger};
    use catalog_common::ImportStatus;
    use std::io::Write;

    fn service() -> ImportService {
        ImportService::new(
            &ImportConfig::default(),
            Arc::new(MemoryCatalog::new()),
            Arc::new(MemoryLedger::new()),
        )
    }

    #[test]
    fn test_run_keys_are_unique() {
        let a = ImportService::new_run_key();
        let b = ImportService::new_run_key();
        assert!(a.starts_with("import-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_start_import_returns_before_completion() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sku,name,price\nA,Widget,1.00").unwrap();

        let service = service();
        let handle = service.start_import(file.path()).await.unwrap();

        let run = service.get_run(&handle.run_key).await.unwrap();
        assert_eq!(run.key, handle.run_key);

        let report = handle.wait().await.unwrap();
        assert_eq!(report.run.status, ImportStatus::Completed);
        assert_eq!(report.run.imported_count, 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_fails_run() {
        let service = service();

        let err = service
            .run_import(Path::new("/nonexistent/products.csv"))
            .await
            .unwrap_err();
        assert!(err.is_stream_read());

        let run = service.latest_run().await.unwrap().unwrap();
        assert_eq!(run.status, ImportStatus::Failed);
        assert_eq!(run.total_count, 0);
    }

    #[tokio::test]
    async fn test_get_unknown_run() {
        let err = service().get_run("import-missing").await.unwrap_err();
        assert!(matches!(err, ImportError::RunNotFound(_)));
    }
}
