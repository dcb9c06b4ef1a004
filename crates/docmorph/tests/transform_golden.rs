use std::fs;
use std::path::{Path, PathBuf};

use docmorph::{parse_spec, transform, RuntimeVars, TransformOptions};
use serde::Deserialize;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|_| panic!("failed to read {}", path.display()))
}

fn load_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&read(path)).unwrap_or_else(|_| panic!("invalid json: {}", path.display()))
}

fn load_spec(base: &Path) -> docmorph::TransformSpec {
    let path = base.join("spec.yaml");
    parse_spec(&read(&path))
        .unwrap_or_else(|err| panic!("failed to parse {}: {}", path.display(), err))
}

fn load_vars(base: &Path) -> RuntimeVars {
    let path = base.join("vars.json");
    if !path.exists() {
        return RuntimeVars::new();
    }
    load_json(&path).as_object().cloned().unwrap_or_default()
}

fn load_options(base: &Path) -> TransformOptions {
    let path = base.join("options.json");
    if !path.exists() {
        return TransformOptions::default();
    }
    let value = load_json(&path);
    TransformOptions {
        limit: value["limit"].as_u64().map(|n| n as usize),
        preview_limit: value["preview_limit"].as_u64().map(|n| n as usize),
    }
}

/// Run the case in `fixtures/<case>` and return its output.
fn run_case(case: &str, input_file: &str) -> String {
    let base = fixtures_dir().join(case);
    let spec = load_spec(&base);
    let input = read(&base.join(input_file));
    transform(&spec, &input, &load_vars(&base), &load_options(&base))
        .unwrap_or_else(|err| panic!("{} failed: {}", case, err))
}

#[derive(Debug, Deserialize)]
struct ExpectedTransformError {
    kind: String,
    path: Option<String>,
    row_index: Option<usize>,
}

fn assert_case_error(case: &str, input_file: &str) {
    let base = fixtures_dir().join(case);
    let spec = load_spec(&base);
    let input = read(&base.join(input_file));
    let expected: ExpectedTransformError =
        serde_json::from_value(load_json(&base.join("expected_error.json")))
            .unwrap_or_else(|err| panic!("invalid expected error in {}: {}", case, err));

    let err = transform(&spec, &input, &load_vars(&base), &load_options(&base))
        .expect_err("expected transform error");
    assert_eq!(err.kind.as_str(), expected.kind, "{}: {}", case, err);
    if expected.path.is_some() {
        assert_eq!(err.path, expected.path, "{}: {}", case, err);
    }
    if expected.row_index.is_some() {
        assert_eq!(err.row_index, expected.row_index, "{}: {}", case, err);
    }
}

#[test]
fn t01_json_csv_employees() {
    let output = run_case("t01_json_csv_employees", "input.json");
    let expected = read(&fixtures_dir().join("t01_json_csv_employees/expected.csv"));
    assert_eq!(output, expected.trim_end());
}

#[test]
fn t02_json_limit_keeps_first_match() {
    let output = run_case("t02_json_limit", "input.json");
    let expected = read(&fixtures_dir().join("t02_json_limit/expected.csv"));
    assert_eq!(output, expected.trim_end());
}

#[test]
fn t03_xml_catalog() {
    let output = run_case("t03_xml_catalog", "input.xml");
    let actual: serde_json::Value = serde_json::from_str(&output).expect("output is json");
    let expected = load_json(&fixtures_dir().join("t03_xml_catalog/expected.json"));
    assert_eq!(actual, expected);
}

#[test]
fn t04_html_links() {
    let output = run_case("t04_html_links", "input.html");
    let expected = read(&fixtures_dir().join("t04_html_links/expected.xml"));
    assert_eq!(output, expected.trim_end());
}

#[test]
fn t05_text_lines() {
    let output = run_case("t05_text_lines", "input.json");
    assert_eq!(output, "ALPHA\n\nGAMMA");
}

#[test]
fn t06_xml_quoted_var() {
    let output = run_case("t06_xml_quoted_var", "input.xml");
    let expected = read(&fixtures_dir().join("t06_xml_quoted_var/expected.txt"));
    assert_eq!(output, expected.trim_end());
}

#[test]
fn t07_csv_single_column_blanks() {
    let output = run_case("t07_csv_single_column_blanks", "input.json");
    assert_eq!(output, "a\n\nc");
}

#[test]
fn t08_xml_literal_var() {
    let output = run_case("t08_xml_literal_var", "input.xml");
    let expected = read(&fixtures_dir().join("t08_xml_literal_var/expected.txt"));
    assert_eq!(output, expected.trim_end());
}

#[test]
fn e01_on_missing_error() {
    assert_case_error("e01_on_missing_error", "input.json");
}

#[test]
fn e02_missing_variable() {
    assert_case_error("e02_missing_variable", "input.json");
}

#[test]
fn e03_invalid_xml() {
    assert_case_error("e03_invalid_xml", "input.xml");
}

#[test]
fn e04_root_not_node_set() {
    assert_case_error("e04_root_not_node_set", "input.xml");
}

#[test]
fn e05_bad_delimiter() {
    assert_case_error("e05_bad_delimiter", "input.json");
}

#[test]
fn tagged_output_reparses_to_original_values() {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let spec = parse_spec(
        r#"
version: 1
name: escaped
input: { type: json, root: ".[]" }
output: { type: xml }
mappings:
  - { name: v, expr: v }
"#,
    )
    .unwrap();
    let values = ["a < b && c > d", "\"quoted\" and 'single'", "plain"];
    let input = serde_json::to_string(
        &values
            .iter()
            .map(|v| serde_json::json!({ "v": v }))
            .collect::<Vec<_>>(),
    )
    .unwrap();

    let output = transform(&spec, &input, &RuntimeVars::new(), &TransformOptions::default()).unwrap();

    let mut reader = Reader::from_str(&output);
    let mut buf = Vec::new();
    let mut seen = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap().into_owned();
                if !text.trim().is_empty() {
                    seen.push(text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => panic!("output is not well-formed xml: {}", err),
        }
        buf.clear();
    }
    assert_eq!(seen, values);
}
