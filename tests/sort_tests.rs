//! External sort tests

mod test_data_gen;

use chrono::{NaiveDate, NaiveTime};
use tabflow::prelude::*;
use test_data_gen::{create_temp_dir, generate_scrambled_rows, int_column, memory_config, spilling_config};

fn sort_rows(rows: Vec<Row>, sort: SortRows, config: FlowConfig) -> Vec<Row> {
    let results = Flow::new()
        .step(Load::rows(rows).name("data"))
        .step(sort)
        .with_config(config)
        .results()
        .expect("Failed to run sort flow");
    results.resources.into_iter().next().expect("Missing resource")
}

#[test]
fn test_sort_is_stable() {
    let rows = vec![
        row! { "a" => 3, "tag" => "first" },
        row! { "a" => 1, "tag" => "second" },
        row! { "a" => 2, "tag" => "third" },
        row! { "a" => 1, "tag" => "fourth" },
    ];
    let out = sort_rows(rows, SortRows::new("{a}"), memory_config());
    assert_eq!(int_column(&out, "a"), vec![1, 1, 2, 3]);
    assert_eq!(out[0].get_or_null("tag"), &Value::from("second"));
    assert_eq!(out[1].get_or_null("tag"), &Value::from("fourth"));
}

#[test]
fn test_reverse_sort_keeps_ties_in_input_order() {
    let rows = vec![
        row! { "a" => 1, "tag" => "x" },
        row! { "a" => 2, "tag" => "y" },
        row! { "a" => 1, "tag" => "z" },
    ];
    let out = sort_rows(rows, SortRows::new("{a}").reverse(true), memory_config());
    assert_eq!(int_column(&out, "a"), vec![2, 1, 1]);
    assert_eq!(out[1].get_or_null("tag"), &Value::from("x"));
    assert_eq!(out[2].get_or_null("tag"), &Value::from("z"));
}

#[test]
fn test_numeric_keys_sort_numerically() {
    let rows = vec![
        row! { "n" => 10 },
        row! { "n" => -3 },
        row! { "n" => 2.5 },
        row! { "n" => -100 },
        row! { "n" => 0 },
    ];
    let out = sort_rows(rows, SortRows::new("{n}"), memory_config());
    let ns: Vec<f64> = out
        .iter()
        .map(|r| r.get_or_null("n").as_f64().expect("Expected a number"))
        .collect();
    assert_eq!(ns, vec![-100.0, -3.0, 0.0, 2.5, 10.0]);
}

#[test]
fn test_sort_by_field_list_and_custom_key() {
    let rows = vec![
        row! { "a" => "b", "b" => "2" },
        row! { "a" => "a", "b" => "9" },
        row! { "a" => "b", "b" => "1" },
    ];
    let out = sort_rows(rows.clone(), SortRows::new(vec!["a", "b"]), memory_config());
    let pairs: Vec<String> = out
        .iter()
        .map(|r| format!("{}{}", r.get_or_null("a"), r.get_or_null("b")))
        .collect();
    assert_eq!(pairs, vec!["a9", "b1", "b2"]);

    let out = sort_rows(
        rows,
        SortRows::by(|row| Ok(row.get_or_null("b").to_string())),
        memory_config(),
    );
    assert_eq!(out[0].get_or_null("b"), &Value::from("1"));
}

#[test]
fn test_sort_spills_to_sqlite() {
    let dir = create_temp_dir();
    let rows = generate_scrambled_rows(500);
    let out = sort_rows(rows, SortRows::new("{id}").batch_size(16), spilling_config(dir.path()));
    let ids = int_column(&out, "id");
    assert_eq!(ids, (0..500).collect::<Vec<i64>>());
}

#[test]
fn test_sort_only_touches_matched_resources() {
    let results = Flow::new()
        .step(Load::rows(vec![row! { "a" => 2 }, row! { "a" => 1 }]).name("sorted"))
        .step(Load::rows(vec![row! { "a" => 2 }, row! { "a" => 1 }]).name("untouched"))
        .step(SortRows::new("{a}").resources("sorted"))
        .with_config(memory_config())
        .results()
        .expect("Failed to run sort flow");
    assert_eq!(int_column(&results.resources[0], "a"), vec![1, 2]);
    assert_eq!(int_column(&results.resources[1], "a"), vec![2, 1]);
}

#[test]
fn test_prefix_keys_sort_before_longer_keys() {
    let rows = vec![
        row! { "s" => "a b" },
        row! { "s" => "a" },
        row! { "s" => "a-z" },
    ];
    let names = |out: &[Row]| -> Vec<String> {
        out.iter()
            .map(|r| r.get_or_null("s").as_str().unwrap_or_default().to_string())
            .collect()
    };
    let dir = create_temp_dir();
    for config in [memory_config(), spilling_config(dir.path())] {
        let out = sort_rows(rows.clone(), SortRows::new("{s}"), config.clone());
        assert_eq!(names(&out), vec!["a", "a b", "a-z"]);
        let out = sort_rows(rows.clone(), SortRows::new("{s}").reverse(true), config);
        assert_eq!(names(&out), vec!["a-z", "a b", "a"]);
    }
}

#[test]
fn test_sort_keeps_fractional_seconds() {
    let row = row! {
        "dt" => DateTimeValue::naive(
            NaiveDate::from_ymd_opt(2021, 1, 2)
                .and_then(|d| d.and_hms_milli_opt(3, 4, 5, 678))
                .expect("Failed to build datetime"),
        ),
        "t" => NaiveTime::from_hms_milli_opt(1, 2, 3, 456).expect("Failed to build time"),
    };
    let out = sort_rows(vec![row.clone()], SortRows::new("{t}"), memory_config());
    assert_eq!(out, vec![row]);
}
