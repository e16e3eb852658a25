//! Catalog Import Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams delimited product files into a keyed catalog in fixed-size upsert
//! batches, keeping a per-run summary ledger of what happened to every row.
//!
//! - [`import`]: reader, validation, batching, upsert and run orchestration
//! - [`store`]: PostgreSQL and in-memory catalog and ledger backends
//! - [`config`]: environment-driven settings
//!
//! # Example
//!
//! ```no_run
//! use catalog_import::config::Config;
//! use catalog_import::import::ImportService;
//! use catalog_import::store::{self, PgCatalogStore, PgSummaryLedger};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let pool = store::postgres::create_pool(&config.database).await?;
//!
//! let service = ImportService::new(
//!     &config.import,
//!     Arc::new(PgCatalogStore::new(pool.clone())),
//!     Arc::new(PgSummaryLedger::new(pool)),
//! );
//!
//! let report = service.run_import(Path::new("products.csv")).await?;
//! println!("{} rows imported", report.run.imported_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod store;

pub use error::{ImportError, Result};
pub use import::{ImportService, ReconcileStrategy};
pub use models::{ImportReport, ImportRun, UpsertCounts};
