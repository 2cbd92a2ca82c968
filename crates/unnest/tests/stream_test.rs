//! End-to-end tests of the streaming pipeline and the format writers.

use apache_avro::types::Value as AvroValue;
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use unnest::{
    flatten, flatten_stream, AvroOptions, Compression, CsvOptions, ErrorKind, FlattenConfig,
    FlattenError, Input, OrcOptions, OutputFormat, ParquetOptions, SchemaDrift,
};

fn config() -> FlattenConfig {
    FlattenConfig {
        time_field: None,
        ..Default::default()
    }
}

fn csv_format() -> OutputFormat {
    OutputFormat::Csv(CsvOptions::default())
}

/// Parse one CSV file back into (headers, rows of cells).
fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let raw = fs::read_to_string(path).expect("read csv file");
    let mut lines = raw.lines();
    let headers = lines
        .next()
        .expect("csv file has a header row")
        .split(',')
        .map(str::to_string)
        .collect();
    let rows = lines
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect();
    (headers, rows)
}

/// Read every row of a Parquet file back as JSON.
fn read_parquet(path: &Path) -> Vec<Value> {
    let file = fs::File::open(path).expect("open parquet file");
    let reader = SerializedFileReader::try_from(file).expect("parquet reader");
    reader
        .into_iter()
        .map(|row| row.expect("parquet row").to_json_value())
        .collect()
}

/// Read every record of an Avro container file, with unions unwrapped.
fn read_avro(path: &Path) -> Vec<Vec<(String, AvroValue)>> {
    let file = fs::File::open(path).expect("open avro file");
    let reader = apache_avro::Reader::new(file).expect("avro reader");
    reader
        .map(|value| {
            let AvroValue::Record(fields) = value.expect("avro record") else {
                panic!("expected record values");
            };
            fields
                .into_iter()
                .map(|(name, value)| (name, unwrap_union(value)))
                .collect()
        })
        .collect()
}

fn unwrap_union(value: AvroValue) -> AvroValue {
    match value {
        AvroValue::Union(_, inner) => *inner,
        other => other,
    }
}

fn field<'v>(record: &'v [(String, AvroValue)], name: &str) -> &'v AvroValue {
    &record
        .iter()
        .find(|(field, _)| field == name)
        .unwrap_or_else(|| panic!("record has field {:?}", name))
        .1
}

#[test]
fn csv_schema_drift_is_strict_by_default() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![json!({"a": 1}), json!({"a": 2, "b": 3})];
    let config = FlattenConfig {
        batch_size: Some(1),
        ..config()
    };

    let err = flatten_stream(
        Input::Values(records),
        dir.path(),
        "items",
        &csv_format(),
        &config,
    )
    .expect_err("drift must abort the run");

    let FlattenError::SchemaDrift { table, column } = &err else {
        panic!("expected schema drift, got {}", err);
    };
    assert_eq!("items", table);
    assert_eq!("b", column);
    assert_eq!(ErrorKind::Output, err.kind());

    // The first batch was flushed before the drift was detected.
    let (headers, rows) = read_csv(&dir.path().join("items.csv"));
    assert_eq!(vec!["_id", "a"], headers);
    assert_eq!(1, rows.len());
    assert_eq!("1", rows[0][1]);
}

#[test]
fn csv_drop_policy_discards_unseen_columns() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![json!({"a": 1}), json!({"a": 2, "b": 3}), json!({})];
    let config = FlattenConfig {
        batch_size: Some(1),
        schema_drift: SchemaDrift::Drop,
        ..config()
    };

    flatten_stream(
        Input::Values(records),
        dir.path(),
        "items",
        &csv_format(),
        &config,
    )
    .expect("drop policy must not abort");

    let (headers, rows) = read_csv(&dir.path().join("items.csv"));
    assert_eq!(vec!["_id", "a"], headers);
    assert_eq!(3, rows.len());
    assert_eq!("1", rows[0][1]);
    assert_eq!("2", rows[1][1]);
    // The record with no data columns writes an empty cell.
    assert_eq!("", rows[2][1]);
}

#[test]
fn csv_headers_can_be_disabled() {
    let dir = tempfile::tempdir().expect("temp dir");
    let format = OutputFormat::Csv(CsvOptions {
        headers: false,
        ..Default::default()
    });
    let config = FlattenConfig {
        id_generation: unnest::IdStrategy::Natural(unnest::NaturalId::Field("k".to_string())),
        ..config()
    };
    flatten_stream(
        Input::Value(json!({"k": "only"})),
        dir.path(),
        "items",
        &format,
        &config,
    )
    .expect("stream");

    let raw = fs::read_to_string(dir.path().join("items.csv")).expect("read csv");
    assert_eq!("only", raw.trim());
}

#[test]
fn extension_paths_send_the_main_table_to_that_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let out = dir.path().join("report.csv");
    let records = vec![json!({"a": 1, "reviews": [{"rating": 5}]})];

    flatten_stream(Input::Values(records), &out, "products", &csv_format(), &config())
        .expect("stream");

    assert!(out.is_file());
    assert!(dir.path().join("report/products_reviews.csv").is_file());
}

#[test]
fn parquet_files_round_trip_with_parent_links() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![
        json!({"name": "Laptop", "price": 999, "reviews": [{"rating": 5}, {"rating": 4}]}),
        json!({"name": "Mouse", "price": 25}),
    ];

    flatten_stream(
        Input::Values(records),
        dir.path(),
        "products",
        &OutputFormat::Parquet(ParquetOptions::default()),
        &config(),
    )
    .expect("stream");

    let products = read_parquet(&dir.path().join("products.parquet"));
    assert_eq!(2, products.len());
    assert_eq!(json!("Laptop"), products[0]["name"]);
    assert_eq!(json!(999), products[0]["price"]);
    assert_eq!(json!("Mouse"), products[1]["name"]);

    let reviews = read_parquet(&dir.path().join("products_reviews.parquet"));
    assert_eq!(2, reviews.len());
    assert_eq!(json!(5), reviews[0]["rating"]);
    assert_eq!(products[0]["_id"], reviews[0]["_parent_id"]);
    assert_eq!(products[0]["_id"], reviews[1]["_parent_id"]);
}

#[test]
fn parquet_mixed_numbers_widen_to_doubles() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![json!({"x": 1}), json!({"x": 2.5})];

    flatten_stream(
        Input::Values(records),
        dir.path(),
        "items",
        &OutputFormat::Parquet(ParquetOptions {
            compression: Compression::None,
            ..Default::default()
        }),
        &config(),
    )
    .expect("stream");

    let rows = read_parquet(&dir.path().join("items.parquet"));
    assert_eq!(json!(1.0), rows[0]["x"]);
    assert_eq!(json!(2.5), rows[1]["x"]);
}

#[test]
fn parquet_coerces_numbers_against_a_locked_schema() {
    // With one record per flush group, the first append locks each column's
    // kind and the second append's values are coerced against that lock
    // rather than being folded into a single batch's inference.
    let dir = tempfile::tempdir().expect("temp dir");
    let config = FlattenConfig {
        batch_size: Some(1),
        ..config()
    };

    flatten_stream(
        Input::Values(vec![json!({"x": 1.5}), json!({"x": 2})]),
        dir.path().join("double").as_path(),
        "items",
        &OutputFormat::Parquet(ParquetOptions::default()),
        &config,
    )
    .expect("an integer must fit a column locked as double");
    let rows = read_parquet(&dir.path().join("double/items.parquet"));
    assert_eq!(json!(1.5), rows[0]["x"]);
    assert_eq!(json!(2.0), rows[1]["x"]);

    flatten_stream(
        Input::Values(vec![json!({"x": 1}), json!({"x": 2.0})]),
        dir.path().join("long").as_path(),
        "items",
        &OutputFormat::Parquet(ParquetOptions::default()),
        &config,
    )
    .expect("a whole float must fit a column locked as integer");
    let rows = read_parquet(&dir.path().join("long/items.parquet"));
    assert_eq!(json!(1), rows[0]["x"]);
    assert_eq!(json!(2), rows[1]["x"]);
}

#[test]
fn parquet_schema_locks_on_the_first_batch() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![json!({"a": 1}), json!({"a": 2, "b": 3})];
    let config = FlattenConfig {
        batch_size: Some(1),
        ..config()
    };

    let err = flatten_stream(
        Input::Values(records),
        dir.path(),
        "items",
        &OutputFormat::Parquet(ParquetOptions::default()),
        &config,
    )
    .expect_err("post-lock columns must be rejected");
    assert!(matches!(err, FlattenError::SchemaDrift { .. }));
}

#[test]
fn avro_rows_missing_a_column_encode_as_null() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![json!({"x": 1.5}), json!({})];
    let config = FlattenConfig {
        batch_size: Some(1),
        ..config()
    };

    flatten_stream(
        Input::Values(records),
        dir.path(),
        "items",
        &OutputFormat::Avro(AvroOptions::default()),
        &config,
    )
    .expect("a missing column is not drift");

    let rows = read_avro(&dir.path().join("items.avro"));
    assert_eq!(2, rows.len());
    assert_eq!(&AvroValue::Double(1.5), field(&rows[0], "x"));
    // The schema admitted null from the start, so the second row's missing
    // value encodes as null with the schema unchanged.
    assert_eq!(&AvroValue::Null, field(&rows[1], "x"));
}

#[test]
fn avro_schema_drift_is_an_output_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![json!({"x": 1}), json!({"x": 2, "y": 3})];
    let config = FlattenConfig {
        batch_size: Some(1),
        ..config()
    };

    let err = flatten_stream(
        Input::Values(records),
        dir.path(),
        "items",
        &OutputFormat::Avro(AvroOptions::default()),
        &config,
    )
    .expect_err("unseen field names must be rejected");
    let FlattenError::SchemaDrift { column, .. } = &err else {
        panic!("expected schema drift, got {}", err);
    };
    assert_eq!("y", column);
}

#[test]
fn avro_mixed_scalars_accept_every_observed_type() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = vec![json!({"x": 1, "x2": "s"}), json!({"x": "later", "x2": 2})];

    flatten_stream(
        Input::Values(records),
        dir.path(),
        "items",
        &OutputFormat::Avro(AvroOptions {
            codec: unnest::AvroCodec::Deflate,
        }),
        &config(),
    )
    .expect("stream");

    let rows = read_avro(&dir.path().join("items.avro"));
    assert_eq!(&AvroValue::Long(1), field(&rows[0], "x"));
    assert_eq!(&AvroValue::String("later".to_string()), field(&rows[1], "x"));
}

#[test]
fn orc_backend_is_reported_as_missing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = flatten_stream(
        Input::Value(json!({"a": 1})),
        dir.path(),
        "items",
        &OutputFormat::Orc(OrcOptions::default()),
        &config(),
    )
    .expect_err("orc has no backend in this build");
    assert!(matches!(err, FlattenError::MissingBackend("orc")));
    assert_eq!(ErrorKind::Dependency, err.kind());
    // The failure happens at open, before any file is created.
    assert!(fs::read_dir(dir.path()).expect("list dir").next().is_none());
}

#[test]
fn save_writes_a_single_file_without_children() {
    let dir = tempfile::tempdir().expect("temp dir");
    let out = dir.path().join("companies.csv");
    let result = flatten(
        Input::Value(json!({"company": "TechCorp"})),
        "companies",
        &config(),
    )
    .expect("flatten");

    result.save(&out, &csv_format()).expect("save");
    assert!(out.is_file());
    let (headers, rows) = read_csv(&out);
    assert_eq!(vec!["_id", "company"], headers);
    assert_eq!(1, rows.len());
}

#[test]
fn save_strips_the_extension_when_children_exist() {
    let dir = tempfile::tempdir().expect("temp dir");
    let out = dir.path().join("products.csv");
    let result = flatten(
        Input::Value(json!({"name": "Laptop", "reviews": [{"rating": 5}]})),
        "products",
        &config(),
    )
    .expect("flatten");

    result.save(&out, &csv_format()).expect("save");
    // The named file is replaced by a directory holding every table.
    assert!(!out.is_file());
    assert!(dir.path().join("products/products.csv").is_file());
    assert!(dir.path().join("products/products_reviews.csv").is_file());
}

#[test]
fn save_supports_parquet_and_avro() {
    let dir = tempfile::tempdir().expect("temp dir");
    let result = flatten(
        Input::Value(json!({"name": "Laptop", "price": 999})),
        "products",
        &config(),
    )
    .expect("flatten");

    result
        .save(&dir.path().join("p"), &OutputFormat::Parquet(ParquetOptions::default()))
        .expect("save parquet");
    let rows = read_parquet(&dir.path().join("p/products.parquet"));
    assert_eq!(json!("Laptop"), rows[0]["name"]);

    result
        .save(&dir.path().join("a"), &OutputFormat::Avro(AvroOptions::default()))
        .expect("save avro");
    let rows = read_avro(&dir.path().join("a/products.avro"));
    assert_eq!(&AvroValue::Long(999), field(&rows[0], "price"));
}

#[test]
fn jsonl_files_stream_end_to_end() {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = dir.path().join("records.jsonl");
    let mut raw = String::new();
    for n in 0..250 {
        raw.push_str(&json!({"n": n}).to_string());
        raw.push('\n');
    }
    fs::write(&source, raw).expect("write jsonl");

    flatten_stream(
        Input::Path(source),
        dir.path().join("out").as_path(),
        "numbers",
        &csv_format(),
        &config(),
    )
    .expect("stream");

    // 250 records cross the default streaming batch size of 100.
    let (_, rows) = read_csv(&dir.path().join("out/numbers.csv"));
    assert_eq!(250, rows.len());
}
