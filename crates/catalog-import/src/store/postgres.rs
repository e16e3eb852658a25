//! PostgreSQL catalog and ledger
//!
//! Schema lives in `migrations/`. Catalog writes use one multi-row
//! `INSERT ... ON CONFLICT (sku) DO UPDATE` per chunk; ledger updates are
//! single conditional `UPDATE` statements so concurrent writers never lose an
//! increment or skip a status check.

use async_trait::async_trait;
use catalog_common::{ImportStatus, LedgerField};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, QueryBuilder, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{CatalogSession, CatalogStore};
use crate::config::DatabaseConfig;
use crate::error::{ImportError, Result};
use crate::import::ledger::{rejection, SummaryLedger};
use crate::models::{CatalogRecord, ImportRun, ProductRow, UpsertCounts};

/// Rows per `INSERT` statement. Six binds per row keeps this well under the
/// 65535 bind parameter limit.
pub const UPSERT_CHUNK_SIZE: usize = 5000;

const SUMMARY_COLUMNS: &str = "key, status, total_count, imported_count, updated_count, \
     invalid_count, duplicates_count, created_at, updated_at, completed_at";

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply pending schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCatalogSession { tx }))
    }

    async fn find(&self, sku: &str) -> Result<Option<CatalogRecord>> {
        let record = sqlx::query_as::<_, CatalogRecord>(
            r#"
            SELECT sku, name, description, price, created_at, updated_at
            FROM products
            WHERE sku = $1
            "#,
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

pub struct PgCatalogSession {
    tx: Transaction<'static, Postgres>,
}

fn upsert_statement<'a>(rows: &'a [ProductRow], stamp: DateTime<Utc>) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO products (sku, name, description, price, created_at, updated_at) ",
    );

    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.sku)
            .push_bind(&row.name)
            .push_bind(&row.description)
            .push_bind(&row.price)
            .push_bind(stamp)
            .push_bind(stamp);
    });

    builder.push(
        " ON CONFLICT (sku) DO UPDATE SET \
         name = EXCLUDED.name, \
         description = EXCLUDED.description, \
         price = EXCLUDED.price, \
         updated_at = EXCLUDED.updated_at",
    );

    builder
}

#[async_trait]
impl CatalogSession for PgCatalogSession {
    async fn count_by_keys(&mut self, keys: &[String]) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE sku = ANY($1)")
            .bind(keys)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count as u64)
    }

    async fn count_by_keys_and_timestamp(
        &mut self,
        keys: &[String],
        stamp: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM products WHERE sku = ANY($1) AND updated_at = $2",
        )
        .bind(keys)
        .bind(stamp)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count as u64)
    }

    async fn upsert_many(&mut self, rows: &[ProductRow], stamp: DateTime<Utc>) -> Result<u64> {
        let mut affected = 0;
        for chunk in rows.chunks(UPSERT_CHUNK_SIZE) {
            let result = upsert_statement(chunk, stamp)
                .build()
                .execute(&mut *self.tx)
                .await?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    async fn upsert_many_with_outcome(
        &mut self,
        rows: &[ProductRow],
        stamp: DateTime<Utc>,
    ) -> Result<Option<UpsertCounts>> {
        let mut counts = UpsertCounts::default();

        for chunk in rows.chunks(UPSERT_CHUNK_SIZE) {
            let mut statement = upsert_statement(chunk, stamp);
            // xmax is zero only for tuples created by this statement
            statement.push(" RETURNING (xmax = 0) AS inserted");

            let outcomes: Vec<bool> = statement
                .build_query_scalar()
                .fetch_all(&mut *self.tx)
                .await?;

            let inserted = outcomes.iter().filter(|inserted| **inserted).count() as u64;
            counts.inserted += inserted;
            counts.updated += outcomes.len() as u64 - inserted;
        }

        Ok(Some(counts))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Summary ledger
// ============================================================================

impl<'r> FromRow<'r, PgRow> for ImportRun {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<ImportStatus>()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            key: row.try_get("key")?,
            status,
            total_count: row.try_get("total_count")?,
            imported_count: row.try_get("imported_count")?,
            updated_count: row.try_get("updated_count")?,
            invalid_count: row.try_get("invalid_count")?,
            duplicates_count: row.try_get("duplicates_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[derive(Clone)]
pub struct PgSummaryLedger {
    pool: PgPool,
}

impl PgSummaryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, run_key: &str) -> Result<Option<ImportStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM import_summaries WHERE key = $1")
                .bind(run_key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(status.map(|s| s.parse::<ImportStatus>()).transpose()?)
    }
}

/// Sum deltas per field so each column is assigned once
fn merge_deltas(deltas: &[(LedgerField, u64)]) -> Result<Vec<(LedgerField, i64)>> {
    LedgerField::ALL
        .into_iter()
        .filter_map(|field| {
            let sum: u64 = deltas
                .iter()
                .filter(|(f, _)| *f == field)
                .map(|(_, delta)| *delta)
                .sum();
            (sum > 0).then_some((field, sum))
        })
        .map(|(field, sum)| {
            i64::try_from(sum)
                .map(|sum| (field, sum))
                .map_err(|_| ImportError::Store(format!("{} delta {} out of range", field, sum)))
        })
        .collect()
}

#[async_trait]
impl SummaryLedger for PgSummaryLedger {
    async fn create(&self, run_key: &str) -> Result<ImportRun> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, ImportRun>(&format!(
            "INSERT INTO import_summaries (key, status, created_at, updated_at) \
             VALUES ($1, 'pending', $2, $2) \
             RETURNING {}",
            SUMMARY_COLUMNS
        ))
        .bind(run_key)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(run) => Ok(run),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(ImportError::DuplicateRun(run_key.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn increment_many(&self, run_key: &str, deltas: &[(LedgerField, u64)]) -> Result<()> {
        let deltas = merge_deltas(deltas)?;

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE import_summaries SET ");
        for (field, delta) in &deltas {
            let column = field.column();
            builder
                .push(column)
                .push(" = ")
                .push(column)
                .push(" + ")
                .push_bind(*delta)
                .push(", ");
        }
        builder
            .push("updated_at = NOW() WHERE key = ")
            .push_bind(run_key)
            .push(" AND status IN ('pending', 'processing')");

        let result = builder.build().execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            let current = self.current_status(run_key).await?;
            return Err(rejection(run_key, current, None));
        }

        debug!(run_key, ?deltas, "Ledger incremented");
        Ok(())
    }

    async fn transition(&self, run_key: &str, to: ImportStatus, at: DateTime<Utc>) -> Result<()> {
        let Some(from) = to.required_predecessor() else {
            let current = self.current_status(run_key).await?;
            return Err(rejection(run_key, current, Some(to)));
        };

        let completed_at = (to == ImportStatus::Completed).then_some(at);

        let result = sqlx::query(
            r#"
            UPDATE import_summaries
            SET status = $2,
                updated_at = $3,
                completed_at = COALESCE($4, completed_at)
            WHERE key = $1 AND status = $5
            "#,
        )
        .bind(run_key)
        .bind(to.as_str())
        .bind(at)
        .bind(completed_at)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.current_status(run_key).await?;
            return Err(rejection(run_key, current, Some(to)));
        }

        debug!(run_key, from = %from, to = %to, "Run status changed");
        Ok(())
    }

    async fn get(&self, run_key: &str) -> Result<Option<ImportRun>> {
        let run = sqlx::query_as::<_, ImportRun>(&format!(
            "SELECT {} FROM import_summaries WHERE key = $1",
            SUMMARY_COLUMNS
        ))
        .bind(run_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    async fn latest(&self) -> Result<Option<ImportRun>> {
        let run = sqlx::query_as::<_, ImportRun>(&format!(
            "SELECT {} FROM import_summaries ORDER BY id DESC LIMIT 1",
            SUMMARY_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }
}
