//! Data models for the import pipeline
//!
//! `RawRow` and `ProductRow` only live while a run streams its input.
//! `ImportRun` and `CatalogRecord` mirror the `import_summaries` and
//! `products` tables.

use bigdecimal::BigDecimal;
use catalog_common::ImportStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One input line keyed by header name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source file (header is line 1)
    pub line: u64,
    pub fields: HashMap<String, String>,
}

impl RawRow {
    pub fn new(line: u64, fields: HashMap<String, String>) -> Self {
        Self { line, fields }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<K, V>(line: u64, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            line,
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

/// A row that passed validation, ready to be upserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRow {
    pub sku: String,
    pub name: String,
    pub description: String,
    /// Non-negative, scale 2
    pub price: BigDecimal,
    pub line: u64,
}

/// A product as stored in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogRecord {
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reconciled outcome of one batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    /// Keys that did not exist before the batch
    pub inserted: u64,
    /// Keys that existed and were overwritten
    pub updated: u64,
    /// Rows dropped because a later row in the same batch had the same key
    pub duplicates: u64,
}

/// Summary ledger record of one import run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRun {
    pub key: String,
    pub status: ImportStatus,
    pub total_count: i64,
    pub imported_count: i64,
    pub updated_count: i64,
    pub invalid_count: i64,
    pub duplicates_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportRun {
    /// A fresh `pending` run with zeroed counters
    pub fn pending(key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            status: ImportStatus::Pending,
            total_count: 0,
            imported_count: 0,
            updated_count: 0,
            invalid_count: 0,
            duplicates_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Rows that passed validation so far
    pub fn valid_count(&self) -> i64 {
        self.total_count - self.invalid_count
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Percentage of valid rows already reflected in the catalog counters
    pub fn applied_ratio(&self) -> f64 {
        let valid = self.valid_count();
        if valid > 0 {
            (self.imported_count + self.updated_count + self.duplicates_count) as f64
                / valid as f64
                * 100.0
        } else {
            0.0
        }
    }
}

/// What a finished run hands back to its caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub run: ImportRun,
    /// Upsert batches applied
    pub batches: u64,
    pub duration_secs: f64,
}

impl ImportReport {
    pub fn rows_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.run.total_count as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}
