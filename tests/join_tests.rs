//! Join and group-by tests

mod test_data_gen;

use tabflow::prelude::*;
use test_data_gen::{create_temp_dir, generate_scrambled_rows, memory_config, spilling_config};

fn source() -> Load {
    Load::rows(vec![row! { "k" => 1, "v" => 10 }, row! { "k" => 1, "v" => 20 }]).name("source")
}

fn target() -> Load {
    Load::rows(vec![row! { "k" => 1 }, row! { "k" => 2 }]).name("target")
}

fn run_join(join: Join) -> FlowResults {
    Flow::new()
        .step(source())
        .step(target())
        .step(join)
        .with_config(memory_config())
        .results()
        .expect("Failed to run join flow")
}

fn total_join() -> Join {
    Join::new("source", vec!["k"], "target", vec!["k"])
        .field("total", FieldSpec::source("v").aggregate(Aggregator::Sum))
}

#[test]
fn test_inner_join_drops_unmatched_target_rows() {
    let results = run_join(total_join().mode(JoinMode::Inner));
    assert_eq!(results.package.resource_names(), vec!["target"]);
    assert_eq!(results.resources[0], vec![row! { "k" => 1, "total" => 30 }]);
}

#[test]
fn test_half_outer_join_keeps_unmatched_target_rows() {
    let results = run_join(total_join());
    assert_eq!(
        results.resources[0],
        vec![
            row! { "k" => 1, "total" => 30 },
            row! { "k" => 2, "total" => Value::Null },
        ]
    );
}

#[test]
fn test_full_outer_join_without_unused_source_keys() {
    let results = run_join(total_join().mode(JoinMode::FullOuter));
    assert_eq!(
        results.resources[0],
        vec![
            row! { "k" => 1, "total" => 30 },
            row! { "k" => 2, "total" => Value::Null },
        ]
    );
}

#[test]
fn test_full_outer_join_emits_unused_source_keys() {
    let results = Flow::new()
        .step(
            Load::rows(vec![row! { "k" => 1, "v" => 5 }, row! { "k" => 3, "v" => 7 }])
                .name("source"),
        )
        .step(target())
        .step(total_join().mode(JoinMode::FullOuter))
        .with_config(memory_config())
        .results()
        .expect("Failed to run join flow");
    let rows = &results.resources[0];
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], row! { "k" => 1, "total" => 5 });
    assert_eq!(rows[1], row! { "k" => 2, "total" => Value::Null });
    assert_eq!(rows[2].get_or_null("total"), &Value::from(7));
    assert_eq!(rows[2].get_or_null("k"), &Value::from(3));
}

#[test]
fn test_deprecated_full_flag_maps_to_modes() {
    let inner = run_join(total_join().full(false));
    assert_eq!(inner.resources[0].len(), 1);
    let outer = run_join(total_join().mode(JoinMode::Inner).full(true));
    assert_eq!(outer.resources[0].len(), 2);
}

#[test]
fn test_source_delete_false_keeps_source() {
    let results = run_join(total_join().source_delete(false));
    assert_eq!(results.package.resource_names(), vec!["source", "target"]);
    assert_eq!(results.resources[0].len(), 2);
}

#[test]
fn test_output_field_types_follow_aggregators() {
    let results = run_join(
        total_join()
            .field("n", FieldSpec::source("v").aggregate(Aggregator::Count))
            .field("all", FieldSpec::source("v").aggregate(Aggregator::Array)),
    );
    let schema = &results.package.resources[0].schema;
    assert_eq!(schema.field("n").map(|f| f.field_type.as_str()), Some("integer"));
    assert_eq!(schema.field("all").map(|f| f.field_type.as_str()), Some("array"));
    assert_eq!(schema.field("total").map(|f| f.field_type.as_str()), Some("integer"));
    assert_eq!(
        results.resources[0][0].get_or_null("all"),
        &Value::Array(vec![Value::from(10), Value::from(20)])
    );
}

#[test]
fn test_group_by_emits_one_row_per_key() {
    let results = Flow::new()
        .step(Load::rows(generate_scrambled_rows(30)).name("facts"))
        .step(
            Join::group_by("facts", vec!["group"], "totals")
                .field("group", FieldSpec::source("group"))
                .field("count", FieldSpec::source("id").aggregate(Aggregator::Count))
                .field("max", FieldSpec::source("value").aggregate(Aggregator::Max)),
        )
        .with_config(memory_config())
        .results()
        .expect("Failed to run group-by flow");
    assert_eq!(results.package.resource_names(), vec!["totals"]);
    let rows = results.rows("totals").expect("Missing totals");
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.get_or_null("count"), &Value::from(10));
    }
    let g2 = rows
        .iter()
        .find(|r| r.get_or_null("group") == &Value::from("g2"))
        .expect("Missing group g2");
    assert_eq!(g2.get_or_null("max"), &Value::from(290));
}

#[test]
fn test_group_by_median_of_even_groups_keeps_source_type() {
    let results = Flow::new()
        .step(
            Load::rows(vec![
                row! { "k" => "a", "n" => 2, "s" => "y" },
                row! { "k" => "a", "n" => 1, "s" => "x" },
            ])
            .name("facts"),
        )
        .step(
            Join::group_by("facts", vec!["k"], "medians")
                .field("k", FieldSpec::source("k"))
                .field("n", FieldSpec::source("n").aggregate(Aggregator::Median))
                .field("s", FieldSpec::source("s").aggregate(Aggregator::Median)),
        )
        .with_config(memory_config())
        .results()
        .expect("Failed to run median flow");
    let schema = &results.package.resources[0].schema;
    assert_eq!(schema.field("n").map(|f| f.field_type.as_str()), Some("integer"));
    assert_eq!(
        results.resources[0],
        vec![row! { "k" => "a", "n" => 2, "s" => "y" }]
    );
}

#[test]
fn test_join_with_self_deduplicates_in_place() {
    let results = Flow::new()
        .step(
            Load::rows(vec![
                row! { "k" => "a", "v" => 1 },
                row! { "k" => "b", "v" => 2 },
                row! { "k" => "a", "v" => 3 },
            ])
            .name("data"),
        )
        .step(Join::with_self(
            "data",
            vec!["k"],
            vec![
                ("k", FieldSpec::new()),
                ("v", FieldSpec::new().aggregate(Aggregator::Last)),
            ],
        ))
        .with_config(memory_config())
        .results()
        .expect("Failed to run self join");
    assert_eq!(results.package.resource_names(), vec!["data"]);
    let rows = &results.resources[0];
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&row! { "k" => "a", "v" => 3 }));
    assert!(rows.contains(&row! { "k" => "b", "v" => 2 }));
}

#[test]
fn test_join_spills_to_sqlite() {
    let dir = create_temp_dir();
    let results = Flow::new()
        .step(Load::rows(generate_scrambled_rows(200)).name("source"))
        .step(Load::rows((0..200).map(|i| row! { "id" => i as i64 })).name("target"))
        .step(
            Join::new("source", vec!["id"], "target", vec!["id"])
                .field("value", FieldSpec::source("value")),
        )
        .with_config(spilling_config(dir.path()))
        .results()
        .expect("Failed to run spilling join");
    let rows = &results.resources[0];
    assert_eq!(rows.len(), 200);
    for row in rows {
        let id = row.get_or_null("id").as_i64().expect("Expected id");
        assert_eq!(row.get_or_null("value"), &Value::from(id * 10));
    }
}

#[test]
fn test_join_metadata_errors_are_config_errors() {
    let missing = Flow::new()
        .step(target())
        .step(Join::new("nope", vec!["k"], "target", vec!["k"]))
        .results()
        .expect_err("Missing source must fail");
    assert!(missing.is_config());

    let reversed = Flow::new()
        .step(target())
        .step(source())
        .step(total_join())
        .with_config(memory_config())
        .results()
        .expect_err("Source after target must fail");
    assert!(reversed.is_config());
    match reversed {
        Error::Processor { name, position, .. } => {
            assert_eq!(name, "join");
            assert_eq!(position, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
}
