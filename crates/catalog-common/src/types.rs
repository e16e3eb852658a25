//! Types shared by the import pipeline, its stores and its tools

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

// ============================================================================
// Import Run Status
// ============================================================================

/// Lifecycle state of an import run.
///
/// Runs move `pending -> processing -> {completed | failed}`. Both terminal
/// states are final; a retry is a new run with a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    /// Whether the run has reached `completed` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Failed)
    }

    /// The single status a run must be in before moving to `self`
    pub fn required_predecessor(&self) -> Option<ImportStatus> {
        match self {
            ImportStatus::Pending => None,
            ImportStatus::Processing => Some(ImportStatus::Pending),
            ImportStatus::Completed | ImportStatus::Failed => Some(ImportStatus::Processing),
        }
    }

    /// Check a transition against the run state machine
    pub fn check_transition(self, to: ImportStatus) -> Result<()> {
        if to.required_predecessor() == Some(self) {
            Ok(())
        } else {
            Err(CommonError::IllegalTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(CommonError::InvalidStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Ledger Counters
// ============================================================================

/// Counter columns of the summary ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerField {
    /// Rows read from the input, valid or not
    Total,
    /// Catalog rows created by a committed batch
    Imported,
    /// Catalog rows overwritten by a committed batch
    Updated,
    /// Rows rejected by validation
    Invalid,
    /// Rows collapsed into a later row with the same key inside one batch
    Duplicates,
}

impl LedgerField {
    pub const ALL: [LedgerField; 5] = [
        LedgerField::Total,
        LedgerField::Imported,
        LedgerField::Updated,
        LedgerField::Invalid,
        LedgerField::Duplicates,
    ];

    /// Column name in the `import_summaries` table
    pub fn column(&self) -> &'static str {
        match self {
            LedgerField::Total => "total_count",
            LedgerField::Imported => "imported_count",
            LedgerField::Updated => "updated_count",
            LedgerField::Invalid => "invalid_count",
            LedgerField::Duplicates => "duplicates_count",
        }
    }
}

impl std::fmt::Display for LedgerField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}
