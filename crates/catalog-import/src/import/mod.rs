//! Streaming product import pipeline
//!
//! ```text
//! RowSource -> RowValidator -> BatchAccumulator -> UpsertEngine -> CatalogStore
//!                   |                                   |
//!                   +------------ SummaryLedger <-------+
//! ```
//!
//! [`ImportOrchestrator`] wires the stages for one run and [`ImportService`]
//! creates runs and dispatches them.

pub mod accumulator;
pub mod ledger;
pub mod orchestrator;
pub mod reader;
pub mod service;
pub mod upsert;
pub mod validator;

pub use accumulator::{AddOutcome, Batch, BatchAccumulator};
pub use ledger::{RunLedger, SummaryLedger};
pub use orchestrator::ImportOrchestrator;
pub use reader::{CsvRowSource, MemoryRowSource, RowSource};
pub use service::{ImportHandle, ImportService};
pub use upsert::{ReconcileStrategy, UpsertEngine};
pub use validator::{RowRejection, RowValidator, Validation};
