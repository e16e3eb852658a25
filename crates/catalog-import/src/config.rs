//! Configuration management

use serde::{Deserialize, Serialize};

use crate::import::upsert::ReconcileStrategy;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/catalog";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default number of valid rows per upsert batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Columns a row must carry to be valid.
pub const DEFAULT_REQUIRED_COLUMNS: &[&str] = &["sku", "name", "price"];

/// Default field delimiter of the input file.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Valid rows buffered before an upsert is issued
    pub batch_size: usize,
    /// Columns that must be present and non-blank
    pub required_columns: Vec<String>,
    /// How insert/update counts are derived for a batch
    pub reconcile: ReconcileStrategy,
    /// Input field delimiter
    pub delimiter: u8,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            required_columns: DEFAULT_REQUIRED_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            reconcile: ReconcileStrategy::default(),
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl ImportConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_reconcile(mut self, reconcile: ReconcileStrategy) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Import batch size must be greater than 0");
        }
        if self.required_columns.iter().any(|c| c.trim().is_empty()) {
            anyhow::bail!("Required column names cannot be blank");
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS")?
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")?
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT")?
                    .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            import: ImportConfig {
                batch_size: env_parse("IMPORT_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
                required_columns: std::env::var("IMPORT_REQUIRED_COLUMNS")
                    .map(|s| parse_column_list(&s))
                    .unwrap_or(defaults.import.required_columns),
                reconcile: match std::env::var("IMPORT_RECONCILE") {
                    Ok(value) => value.parse()?,
                    Err(_) => ReconcileStrategy::default(),
                },
                delimiter: match std::env::var("IMPORT_DELIMITER") {
                    Ok(value) => parse_delimiter(&value)?,
                    Err(_) => DEFAULT_DELIMITER,
                },
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.import.validate()
    }
}

/// `None` when `key` is unset; a value that does not parse is an error
fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", key, value, e)),
        Err(_) => Ok(None),
    }
}

/// Split a comma-separated column list, dropping blanks
pub fn parse_column_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Accept a single-byte delimiter, or the words `tab` / `\t`
pub fn parse_delimiter(value: &str) -> anyhow::Result<u8> {
    match value {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        v if v.len() == 1 && v.is_ascii() => Ok(v.as_bytes()[0]),
        v => anyhow::bail!("Delimiter must be a single ASCII character, got '{}'", v),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.import.batch_size, 1000);
        assert_eq!(config.import.required_columns, vec!["sku", "name", "price"]);
        assert_eq!(config.import.delimiter, b',');
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = ImportConfig::default().with_batch_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_connections_above_max_rejected() {
        let mut config = Config::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_column_list() {
        assert_eq!(
            parse_column_list(" sku, name ,,price "),
            vec!["sku".to_string(), "name".to_string(), "price".to_string()]
        );
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert!(parse_delimiter("||").is_err());
    }
}
