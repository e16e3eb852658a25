//! Catalog Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared pieces used by every catalog workspace member:
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Errors**: the common error type and result alias
//! - **Types**: run status and ledger counter enums shared by stores and tools
//!
//! # Example
//!
//! ```no_run
//! use catalog_common::logging::{init_logging, LogConfig};
//! use catalog_common::types::ImportStatus;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let status: ImportStatus = "pending".parse()?;
//!     tracing::info!(%status, "parsed status");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
pub use types::{ImportStatus, LedgerField};
