//! Shared helpers for catalog-import integration tests
//!
//! - [`TestPostgres`]: a throwaway PostgreSQL container with migrations applied
//! - [`write_csv`]: a temporary input file
//! - [`memory_service`]: an import service over the in-memory backends

#![allow(dead_code)]

use anyhow::{Context, Result};
use catalog_import::config::ImportConfig;
use catalog_import::import::ImportService;
use catalog_import::store::{MemoryCatalog, MemoryLedger};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    // Dropping the handle stops the container
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        catalog_import::store::postgres::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Write `lines` (header first) to a temporary file
pub fn write_csv(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    for line in lines {
        writeln!(file, "{}", line).expect("Failed to write temp file");
    }
    file.flush().expect("Failed to flush temp file");
    file
}

pub struct MemoryBackend {
    pub catalog: Arc<MemoryCatalog>,
    pub ledger: Arc<MemoryLedger>,
    pub service: ImportService,
}

pub fn memory_service(config: ImportConfig) -> MemoryBackend {
    let catalog = Arc::new(MemoryCatalog::new());
    let ledger = Arc::new(MemoryLedger::new());
    let service = ImportService::new(&config, catalog.clone(), ledger.clone());
    MemoryBackend {
        catalog,
        ledger,
        service,
    }
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,catalog_import=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
