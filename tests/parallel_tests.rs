//! Parallel row executor tests

mod test_data_gen;

use std::time::Duration;

use tabflow::prelude::*;
use test_data_gen::{generate_scrambled_rows, int_column, memory_config};

fn double_even(row: &mut Row) -> Result<()> {
    let value = row.get_or_null("value").as_i64().unwrap_or(0);
    row.insert("value", value * 2);
    Ok(())
}

fn is_even(row: &Row) -> bool {
    row.get_or_null("id").as_i64().unwrap_or(1) % 2 == 0
}

#[test]
fn test_parallel_output_matches_sequential_multiset() {
    let rows = generate_scrambled_rows(1000);
    let mut expected: Vec<(i64, i64)> = rows
        .iter()
        .map(|r| {
            let mut r = r.clone();
            if is_even(&r) {
                double_even(&mut r).expect("Failed to transform");
            }
            (
                r.get_or_null("id").as_i64().unwrap_or_default(),
                r.get_or_null("value").as_i64().unwrap_or_default(),
            )
        })
        .collect();
    expected.sort();

    let results = Flow::new()
        .step(Load::rows(rows).name("data"))
        .step(
            Parallelize::new(double_even)
                .predicate(is_even)
                .workers(4)
                .queue_capacity(16),
        )
        .with_config(memory_config())
        .results()
        .expect("Failed to run parallel flow");
    let out = &results.resources[0];
    let mut got: Vec<(i64, i64)> = int_column(out, "id")
        .into_iter()
        .zip(int_column(out, "value"))
        .collect();
    got.sort();
    assert_eq!(got, expected);
}

#[test]
fn test_failing_rows_are_emitted_unmodified_and_counted() {
    let results = Flow::new()
        .step(Load::rows((0..20).map(|i| row! { "id" => i as i64 })).name("data"))
        .step(
            Parallelize::new(|row: &mut Row| {
                row.insert("done", true);
                match row.get_or_null("id").as_i64() {
                    Some(id) if id % 5 == 0 => Err(Error::config("cannot handle this row")),
                    _ => Ok(()),
                }
            })
            .workers(3),
        )
        .with_config(memory_config())
        .results()
        .expect("Failed to run parallel flow");
    let out = &results.resources[0];
    assert_eq!(out.len(), 20);
    let untouched = out.iter().filter(|r| !r.contains_key("done")).count();
    assert_eq!(untouched, 4);
    assert_eq!(
        results.stats.get("data:parallel_failed_rows"),
        Some(&serde_json::json!(4))
    );
}

#[test]
fn test_parallel_then_sort_restores_order() {
    let rows = generate_scrambled_rows(200);
    let results = Flow::new()
        .step(Load::rows(rows).name("data"))
        .step(
            Parallelize::new(|row: &mut Row| {
                row.insert("seen", true);
                Ok(())
            })
            .workers(8)
            .join_timeout(Duration::from_secs(2)),
        )
        .step(SortRows::new("{id}"))
        .with_config(memory_config())
        .results()
        .expect("Failed to run parallel flow");
    let out = &results.resources[0];
    assert_eq!(int_column(out, "id"), (0..200).collect::<Vec<i64>>());
    assert!(out.iter().all(|r| r.contains_key("seen")));
}

#[test]
fn test_unmatched_resources_are_untouched() {
    let results = Flow::new()
        .step(Load::rows(vec![row! { "id" => 1 }]).name("a"))
        .step(Load::rows(vec![row! { "id" => 2 }]).name("b"))
        .step(
            Parallelize::new(|row: &mut Row| {
                row.insert("seen", true);
                Ok(())
            })
            .resources("b"),
        )
        .with_config(memory_config())
        .results()
        .expect("Failed to run parallel flow");
    assert_eq!(results.resources[0], vec![row! { "id" => 1 }]);
    assert_eq!(results.resources[1], vec![row! { "id" => 2, "seen" => true }]);
}
