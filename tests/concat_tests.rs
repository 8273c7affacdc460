//! Concatenate tests

mod test_data_gen;

use tabflow::prelude::*;
use test_data_gen::memory_config;

fn three_resources() -> Flow {
    Flow::new()
        .step(Load::rows(vec![row! { "name" => "keep" }]).name("other"))
        .step(Load::rows(vec![row! { "city" => "Paris", "pop" => 2 }]).name("eu"))
        .step(Load::rows(vec![row! { "town" => "Austin", "pop" => 1 }]).name("us"))
}

#[test]
fn test_concatenate_in_package_order() {
    let results = three_resources()
        .step(
            Concatenate::new()
                .field("city", vec!["town"])
                .field("pop", Vec::<String>::new())
                .resources(vec!["eu", "us"]),
        )
        .with_config(memory_config())
        .results()
        .expect("Failed to run concat flow");
    assert_eq!(results.package.resource_names(), vec!["other", "concat"]);
    let target = &results.package.resources[1];
    assert_eq!(target.path.as_deref(), Some("data/concat.csv"));
    assert_eq!(
        target.schema.field_names().collect::<Vec<_>>(),
        vec!["city", "pop"]
    );
    assert_eq!(
        results.resources[1],
        vec![
            row! { "city" => "Paris", "pop" => 2 },
            row! { "city" => "Austin", "pop" => 1 },
        ]
    );
}

#[test]
fn test_unmapped_target_fields_are_null_and_typed_string() {
    let results = three_resources()
        .step(
            Concatenate::new()
                .field("city", vec!["town"])
                .field("country", Vec::<String>::new())
                .target_name("places")
                .resources(vec!["eu", "us"]),
        )
        .with_config(memory_config())
        .results()
        .expect("Failed to run concat flow");
    let target = results.package.resource("places").expect("Missing target");
    assert_eq!(
        target.schema.field("country").map(|f| f.field_type.as_str()),
        Some("string")
    );
    let rows = results.rows("places").expect("Missing rows");
    assert_eq!(rows[0], row! { "city" => "Paris", "country" => Value::Null });
}

#[test]
fn test_all_null_row_is_config_error() {
    let err = Flow::new()
        .step(Load::rows(vec![row! { "a" => 1 }, row! { "b" => 2 }]).name("data"))
        .step(Concatenate::new().field("a", Vec::<String>::new()))
        .with_config(memory_config())
        .results()
        .expect_err("An empty row must fail");
    assert!(err.is_config());
}

#[test]
fn test_duplicate_mapping_is_config_error() {
    let err = three_resources()
        .step(
            Concatenate::new()
                .field("city", vec!["town"])
                .field("place", vec!["town"]),
        )
        .with_config(memory_config())
        .results()
        .expect_err("Duplicate mapping must fail");
    assert!(err.is_config());
}

#[test]
fn test_non_consecutive_resources_are_rejected() {
    let err = three_resources()
        .step(Concatenate::new().field("name", vec!["town"]).resources(vec!["other", "us"]))
        .with_config(memory_config())
        .results()
        .expect_err("Non-consecutive resources must fail");
    assert!(err.is_config());
}
