//! Environment-driven configuration loading
//!
//! These tests mutate process environment variables, so they run serially.

use catalog_import::config::{Config, DEFAULT_BATCH_SIZE};
use catalog_import::ReconcileStrategy;
use serial_test::serial;

const IMPORT_VARS: &[&str] = &[
    "IMPORT_BATCH_SIZE",
    "IMPORT_REQUIRED_COLUMNS",
    "IMPORT_RECONCILE",
    "IMPORT_DELIMITER",
];

fn clear_import_vars() {
    for var in IMPORT_VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_load_uses_defaults() {
    clear_import_vars();

    let config = Config::load().unwrap();

    assert_eq!(config.import.batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(config.import.reconcile, ReconcileStrategy::Native);
    assert_eq!(config.import.delimiter, b',');
}

#[test]
#[serial]
fn test_load_reads_import_overrides() {
    clear_import_vars();
    std::env::set_var("IMPORT_BATCH_SIZE", "250");
    std::env::set_var("IMPORT_REQUIRED_COLUMNS", "sku, name, price, description");
    std::env::set_var("IMPORT_RECONCILE", "existence");
    std::env::set_var("IMPORT_DELIMITER", "tab");

    let config = Config::load().unwrap();
    clear_import_vars();

    assert_eq!(config.import.batch_size, 250);
    assert_eq!(
        config.import.required_columns,
        vec!["sku", "name", "price", "description"]
    );
    assert_eq!(config.import.reconcile, ReconcileStrategy::Existence);
    assert_eq!(config.import.delimiter, b'\t');
}

#[test]
#[serial]
fn test_load_rejects_bad_values() {
    clear_import_vars();

    std::env::set_var("IMPORT_RECONCILE", "guess");
    assert!(Config::load().is_err());
    clear_import_vars();

    std::env::set_var("IMPORT_BATCH_SIZE", "0");
    assert!(Config::load().is_err());
    clear_import_vars();

    std::env::set_var("IMPORT_DELIMITER", ";;");
    assert!(Config::load().is_err());
    clear_import_vars();
}

#[test]
#[serial]
fn test_load_rejects_unparseable_batch_size() {
    clear_import_vars();

    for value in ["abc", "-5", "1.5"] {
        std::env::set_var("IMPORT_BATCH_SIZE", value);
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("IMPORT_BATCH_SIZE"), "{}: {}", value, err);
    }
    clear_import_vars();

    std::env::set_var("IMPORT_BATCH_SIZE", " 42 ");
    assert_eq!(Config::load().unwrap().import.batch_size, 42);
    clear_import_vars();
}
