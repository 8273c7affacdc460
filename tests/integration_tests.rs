//! End-to-end flow tests

mod test_data_gen;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tabflow::prelude::*;
use test_data_gen::{int_column, memory_config};

fn numbers(name: &str, values: &[i64]) -> Load {
    Load::rows(values.iter().map(|v| row! { "n" => *v }).collect::<Vec<_>>()).name(name)
}

#[test]
fn test_load_infers_schema_and_default_names() {
    let results = Flow::new()
        .step(Load::rows(vec![
            row! { "a" => 1, "b" => "x", "c" => 1.5 },
            row! { "a" => 2, "b" => 3, "c" => Value::Null },
        ]))
        .step(numbers("named", &[1]))
        .step(Load::rows(Vec::new()))
        .results()
        .expect("Failed to run load flow");
    assert_eq!(
        results.package.resource_names(),
        vec!["res_1", "named", "res_3"]
    );
    let schema = &results.package.resources[0].schema;
    let types: Vec<&str> = schema.fields.iter().map(|f| f.field_type.as_str()).collect();
    assert_eq!(types, vec!["integer", "any", "number"]);
    assert_eq!(
        results.package.resources[0].path.as_deref(),
        Some("res_1.csv")
    );
}

#[test]
fn test_duplicate_resource_name_is_config_error() {
    let err = Flow::new()
        .step(numbers("a", &[1]))
        .step(numbers("a", &[2]))
        .results()
        .expect_err("Duplicate names must fail");
    assert!(err.is_config());
}

#[test]
fn test_datastream_is_lazy() {
    let pulled = Arc::new(AtomicBool::new(false));
    let flag = pulled.clone();
    let ds = Flow::new()
        .step(numbers("a", &[1, 2, 3]).schema(Schema::new(vec![FieldDescriptor::new(
            "n", "integer",
        )])))
        .step(row_processor(move |_row: &mut Row| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }))
        .datastream()
        .expect("Failed to wire flow");
    assert_eq!(ds.package.resource_names(), vec!["a"]);
    assert!(!pulled.load(Ordering::SeqCst));
    ds.drain().expect("Failed to drain");
    assert!(pulled.load(Ordering::SeqCst));
}

#[test]
fn test_renamed_resource_keeps_its_stream() {
    let results = Flow::new()
        .step(numbers("a", &[1, 2]))
        .step(numbers("b", &[3]))
        .step(package_processor(|mut package: PackageDescriptor| {
            if let Some(r) = package.resource_mut("a") {
                r.name = "renamed".to_string();
            }
            Ok(package)
        }))
        .results()
        .expect("Failed to run rename flow");
    assert_eq!(results.package.resource_names(), vec!["renamed", "b"]);
    assert_eq!(int_column(&results.resources[0], "n"), vec![1, 2]);
    assert_eq!(int_column(&results.resources[1], "n"), vec![3]);
}

#[test]
fn test_errors_are_wrapped_once_with_position() {
    let err = Flow::new()
        .step(numbers("a", &[1, 2]))
        .step(row_processor(|row: &mut Row| {
            if row.get_or_null("n").as_i64() == Some(2) {
                return Err(Error::config("two is not allowed"));
            }
            Ok(())
        })
        .named("no_twos"))
        .step(SortRows::new("{n}"))
        .with_config(memory_config())
        .results()
        .expect_err("Row error must surface");
    match &err {
        Error::Processor { name, position, source } => {
            assert_eq!(name, "no_twos");
            assert_eq!(*position, 2);
            assert!(matches!(**source, Error::Config(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("errored in processor no_twos in position #2"));
}

#[test]
fn test_results_with_cast_policies() {
    let flow = || {
        Flow::new().step(
            Load::rows(vec![row! { "n" => "1" }, row! { "n" => "x" }, row! { "n" => 3 }])
                .name("data")
                .schema(Schema::new(vec![FieldDescriptor::new("n", "integer")])),
        )
    };

    let err = flow()
        .results_with(OnError::Raise, &BasicCaster)
        .expect_err("Bad value must fail");
    assert!(matches!(
        err.root_cause(),
        Error::Validation { row_index: 1, .. }
    ));

    let dropped = flow()
        .results_with(OnError::Drop, &BasicCaster)
        .expect("Failed with drop policy");
    assert_eq!(int_column(&dropped.resources[0], "n"), vec![1, 3]);

    let cleared = flow()
        .results_with(OnError::Clear, &BasicCaster)
        .expect("Failed with clear policy");
    assert_eq!(cleared.resources[0][1], row! { "n" => Value::Null });

    let ignored = flow()
        .results_with(OnError::Ignore, &BasicCaster)
        .expect("Failed with ignore policy");
    assert_eq!(ignored.resources[0][1], row! { "n" => "x" });
}

#[test]
fn test_validate_processor_checks() {
    let results = Flow::new()
        .step(numbers("data", &[1, -2, 3]))
        .step(
            Validate::field("n", |v| v.as_i64().map_or(false, |n| n > 0))
                .on_error(OnError::Drop),
        )
        .results()
        .expect("Failed to validate");
    assert_eq!(int_column(&results.resources[0], "n"), vec![1, 3]);

    let err = Flow::new()
        .step(numbers("data", &[1, -2]))
        .step(Validate::rows(|row| row.get_or_null("n").as_i64() != Some(-2)))
        .results()
        .expect_err("Failed check must raise");
    match err {
        Error::Processor { name, source, .. } => {
            assert_eq!(name, "validate");
            assert!(matches!(*source, Error::Validation { row_index: 1, .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_filter_rows() {
    let results = Flow::new()
        .step(numbers("a", &[1, 2, 3, 4]))
        .step(numbers("b", &[1, 2, 3, 4]))
        .step(FilterRows::new(|row| row.get_or_null("n").as_i64().unwrap_or(0) > 2).resources("a"))
        .step(FilterRows::equals(vec![row! { "n" => 2 }, row! { "n" => 4 }]).resources("b"))
        .results()
        .expect("Failed to filter");
    assert_eq!(int_column(&results.resources[0], "n"), vec![3, 4]);
    assert_eq!(int_column(&results.resources[1], "n"), vec![2, 4]);
}

#[test]
fn test_delete_resource_still_runs_upstream() {
    let seen = Arc::new(AtomicBool::new(false));
    let flag = seen.clone();
    let results = Flow::new()
        .step(numbers("gone", &[1]))
        .step(numbers("kept", &[2]))
        .step(
            row_processor(move |_row: &mut Row| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .resources("gone"),
        )
        .step(DeleteResource::new("gone"))
        .results()
        .expect("Failed to delete");
    assert_eq!(results.package.resource_names(), vec!["kept"]);
    assert_eq!(int_column(&results.resources[0], "n"), vec![2]);
    assert!(seen.load(Ordering::SeqCst));
}

#[test]
fn test_rows_processor_and_pattern_matcher() {
    let results = Flow::new()
        .step(numbers("res_a", &[1, 2, 3]))
        .step(numbers("other", &[1, 2, 3]))
        .step(
            rows_processor(|resource: ResourceStream| -> RowStream {
                Box::new(resource.rows.take(1))
            })
            .resources(ResourceMatcher::pattern("res_.*").expect("Failed to compile pattern")),
        )
        .results()
        .expect("Failed to run rows processor");
    assert_eq!(results.resources[0].len(), 1);
    assert_eq!(results.resources[1].len(), 3);
}

#[test]
fn test_process_returns_stats() {
    let (package, stats) = Flow::new()
        .step(numbers("a", &[1, 2]))
        .step(Parallelize::new(|_row: &mut Row| Err(Error::config("always"))).workers(1))
        .with_config(memory_config())
        .process()
        .expect("Failed to process");
    assert_eq!(stats.get("a:parallel_failed_rows"), Some(&serde_json::json!(2)));
    assert_eq!(
        package.stats.get("a:parallel_failed_rows"),
        Some(&serde_json::json!(2))
    );
}

#[test]
fn test_nested_flows_share_configuration() {
    let inner = Flow::new()
        .step(numbers("b", &[2, 1]))
        .step(SortRows::new("{n}").resources("b"));
    let results = Flow::new()
        .step(numbers("a", &[5]))
        .flow(inner)
        .with_config(memory_config())
        .results()
        .expect("Failed to run nested flow");
    assert_eq!(results.package.resource_names(), vec!["a", "b"]);
    assert_eq!(int_column(&results.resources[1], "n"), vec![1, 2]);
}
