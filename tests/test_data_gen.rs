//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use tabflow::prelude::*;

/// Config whose stores never touch disk.
pub fn memory_config() -> FlowConfig {
    FlowConfig {
        store_backend: StoreBackendKind::Memory,
        ..FlowConfig::default()
    }
}

/// Config with a tiny cache so every store spills into sqlite under `dir`.
pub fn spilling_config(dir: &Path) -> FlowConfig {
    FlowConfig {
        store_backend: StoreBackendKind::Sqlite,
        store_dir: Some(dir.to_path_buf()),
        store_cache_size: 4,
        store_batch_size: 8,
        keyset_memory_limit: 4,
        ..FlowConfig::default()
    }
}

pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// `n` rows `{id, group, value}` with ids in a scrambled order.
pub fn generate_scrambled_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            let id = ((i * 7919) % n) as i64;
            row! {
                "id" => id,
                "group" => format!("g{}", id % 3),
                "value" => id * 10,
            }
        })
        .collect()
}

/// One row carrying every value kind that needs an extended-JSON tag.
pub fn generate_typed_row() -> Row {
    let decimal: Decimal = "1234.5678".parse().expect("Failed to parse decimal");
    row! {
        "decimal" => decimal,
        "date" => NaiveDate::from_ymd_opt(2021, 3, 14).expect("Failed to build date"),
        "time" => NaiveTime::from_hms_micro_opt(15, 9, 26, 535_897).expect("Failed to build time"),
        "datetime" => DateTimeValue::with_zone(
            NaiveDate::from_ymd_opt(2021, 3, 14)
                .and_then(|d| d.and_hms_milli_opt(1, 59, 26, 535))
                .expect("Failed to build datetime"),
            3600,
            "CET",
        ),
        "local" => DateTimeValue::naive(
            NaiveDate::from_ymd_opt(2021, 1, 2)
                .and_then(|d| d.and_hms_micro_opt(3, 4, 5, 678_000))
                .expect("Failed to build datetime"),
        ),
        "duration" => IsoDuration::parse("P1DT2H").expect("Failed to parse duration"),
        "set" => Value::Set(vec![Value::from(1), Value::from("two")]),
        "text" => "plain",
        "missing" => Value::Null,
    }
}

pub fn int_column(rows: &[Row], field: &str) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get_or_null(field).as_i64().expect("Expected an integer"))
        .collect()
}
