//! Catalog Import - streams product files into the catalog

use anyhow::{Context, Result};
use catalog_common::logging::{init_logging, LogConfig, LogLevel};
use catalog_import::config::Config;
use catalog_import::import::{ImportService, ReconcileStrategy};
use catalog_import::models::{ImportReport, ImportRun};
use catalog_import::store::{self, MemoryCatalog, MemoryLedger, PgCatalogStore, PgSummaryLedger};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog-import")]
#[command(author, version, about = "Product catalog import tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Keep the catalog and ledger in memory instead of PostgreSQL.
    /// Only `run` and `start` accept it: the ledger is gone when the process exits.
    #[arg(long, global = true)]
    memory: bool,

    /// Valid rows per upsert batch (overrides IMPORT_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// How inserted/updated counts are derived (overrides IMPORT_RECONCILE)
    #[arg(long, global = true)]
    reconcile: Option<ReconcileStrategy>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Cli {
    fn check_backend(&self) -> Result<()> {
        if self.memory && !matches!(self.command, Command::Run { .. } | Command::Start { .. }) {
            anyhow::bail!(
                "--memory only applies to `run` and `start`; `{}` needs the PostgreSQL ledger",
                self.command.name()
            );
        }
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one or more files and wait for every run to finish
    Run {
        /// Delimited files with a header row
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Register a run, process it in the background and print its key
    Start {
        file: PathBuf,
    },

    /// Show the ledger record of a run
    Status {
        run_key: String,
    },

    /// Show the most recently created run
    Latest,

    /// Apply database migrations
    Migrate,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Start { .. } => "start",
            Command::Status { .. } => "status",
            Command::Latest => "latest",
            Command::Migrate => "migrate",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.check_backend()?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else if cli.json {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("catalog-import")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(batch_size) = cli.batch_size {
        config.import.batch_size = batch_size;
    }
    if let Some(reconcile) = cli.reconcile {
        config.import.reconcile = reconcile;
    }
    config.validate()?;

    if let Command::Migrate = cli.command {
        let pool = store::postgres::create_pool(&config.database).await?;
        store::postgres::run_migrations(&pool).await?;
        return Ok(());
    }

    let service = build_service(&config, cli.memory).await?;

    match cli.command {
        Command::Run { files } => {
            let runs = files.iter().map(|file| service.run_import(file));
            let results = futures::future::join_all(runs).await;

            let mut failures = 0;
            for (file, result) in files.iter().zip(results) {
                match result {
                    Ok(report) => print_report(&report, cli.json)?,
                    Err(e) => {
                        failures += 1;
                        eprintln!("{}: {}", file.display(), e);
                    },
                }
            }
            if failures > 0 {
                anyhow::bail!("{} of {} imports failed", failures, files.len());
            }
        },
        Command::Start { file } => {
            let handle = service.start_import(file).await?;
            println!("{}", handle.run_key);
            // The process owns the background task; wait so the run is not cut short.
            let report = handle.wait().await?;
            info!("Run {} finished as {}", report.run.key, report.run.status);
        },
        Command::Status { run_key } => {
            let run = service.get_run(&run_key).await?;
            print_run(&run, cli.json)?;
        },
        Command::Latest => match service.latest_run().await? {
            Some(run) => print_run(&run, cli.json)?,
            None => println!("No import runs recorded"),
        },
        Command::Migrate => {},
    }

    Ok(())
}

async fn build_service(config: &Config, memory: bool) -> Result<ImportService> {
    if memory {
        info!("Using in-memory catalog and ledger");
        return Ok(ImportService::new(
            &config.import,
            Arc::new(MemoryCatalog::new()),
            Arc::new(MemoryLedger::new()),
        ));
    }

    let pool = store::postgres::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;

    Ok(ImportService::new(
        &config.import,
        Arc::new(PgCatalogStore::new(pool.clone())),
        Arc::new(PgSummaryLedger::new(pool)),
    ))
}

fn print_report(report: &ImportReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    print_run(&report.run, false)?;
    println!("  batches:     {}", report.batches);
    println!(
        "  duration:    {:.2}s ({:.0} rows/s)",
        report.duration_secs,
        report.rows_per_second()
    );
    Ok(())
}

fn print_run(run: &ImportRun, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }

    println!("Import run {}", run.key);
    println!("  status:      {}", run.status);
    println!("  total:       {}", run.total_count);
    println!("  imported:    {}", run.imported_count);
    println!("  updated:     {}", run.updated_count);
    println!("  invalid:     {}", run.invalid_count);
    println!("  duplicates:  {}", run.duplicates_count);
    println!("  applied:     {:.1}% of valid rows", run.applied_ratio());
    println!("  created:     {}", run.created_at.to_rfc3339());
    if let Some(completed_at) = run.completed_at {
        println!("  completed:   {}", completed_at.to_rfc3339());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_limited_to_import_commands() {
        for args in [
            vec!["catalog-import", "--memory", "run", "a.csv"],
            vec!["catalog-import", "--memory", "start", "a.csv"],
            vec!["catalog-import", "status", "import-1"],
        ] {
            let cli = Cli::try_parse_from(&args).unwrap();
            assert!(cli.check_backend().is_ok(), "{:?}", args);
        }

        for args in [
            vec!["catalog-import", "--memory", "status", "import-1"],
            vec!["catalog-import", "latest", "--memory"],
            vec!["catalog-import", "--memory", "migrate"],
        ] {
            let cli = Cli::try_parse_from(&args).unwrap();
            let err = cli.check_backend().unwrap_err();
            assert!(err.to_string().contains("--memory"), "{:?}", args);
        }
    }
}
