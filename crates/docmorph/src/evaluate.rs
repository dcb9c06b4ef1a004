use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::dialect::{self, CompiledExpr, DialectError, Document, Row};
use crate::error::{TransformError, TransformErrorKind};
use crate::interpolate::{interpolate, param_types, InterpolateError, RuntimeVars};
use crate::model::{OnMissing, TransformSpec, ValueType};
use crate::value::{number_value, EvalValue};

/// One rendered row: mapping names and their values, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputRow {
    values: Vec<(String, JsonValue)>,
}

impl OutputRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: JsonValue) {
        self.values.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        for (key, value) in &self.values {
            map.insert(key.clone(), value.clone());
        }
        JsonValue::Object(map)
    }
}

impl<N: Into<String>> FromIterator<(N, JsonValue)> for OutputRow {
    fn from_iter<T: IntoIterator<Item = (N, JsonValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// =============================================================================
// Coercion
// =============================================================================

const TRUE_WORDS: &[&str] = &["true", "1", "yes", "y", "on"];
const FALSE_WORDS: &[&str] = &["false", "0", "no", "n", "off"];

/// Coerce an evaluated value to a mapping's declared type. Values that do not
/// fit the type become missing.
pub fn coerce(value: EvalValue, value_type: ValueType) -> EvalValue {
    let EvalValue::Value(value) = value else {
        return EvalValue::Missing;
    };
    let coerced = match value_type {
        ValueType::String | ValueType::Date | ValueType::Any => Some(value),
        ValueType::Number => match &value {
            JsonValue::Number(_) => Some(value),
            JsonValue::String(s) => s.trim().parse::<f64>().ok().and_then(number_value),
            _ => None,
        },
        ValueType::Boolean => match &value {
            JsonValue::Bool(_) => Some(value),
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) if f == 1.0 => Some(JsonValue::Bool(true)),
                Some(f) if f == 0.0 => Some(JsonValue::Bool(false)),
                _ => None,
            },
            JsonValue::String(s) => {
                let word = s.trim().to_ascii_lowercase();
                if TRUE_WORDS.contains(&word.as_str()) {
                    Some(JsonValue::Bool(true))
                } else if FALSE_WORDS.contains(&word.as_str()) {
                    Some(JsonValue::Bool(false))
                } else {
                    None
                }
            }
            _ => None,
        },
    };
    match coerced {
        Some(v) => EvalValue::Value(v),
        None => EvalValue::Missing,
    }
}

// =============================================================================
// Compilation
// =============================================================================

struct CompiledStep {
    path: String,
    label: String,
    expr: String,
    compiled: CompiledExpr,
}

/// Spec expressions with variables substituted and compiled for the input
/// dialect. Built once per transform call.
pub struct CompiledSpec<'s> {
    spec: &'s TransformSpec,
    root: String,
    filters: Vec<CompiledStep>,
    mappings: Vec<CompiledStep>,
}

impl CompiledSpec<'_> {
    pub fn root(&self) -> &str {
        &self.root
    }
}

fn interpolation_error(err: InterpolateError, path: &str) -> TransformError {
    TransformError::new(TransformErrorKind::MissingVariable, err.to_string()).with_path(path)
}

fn expression_error(err: DialectError, path: &str, label: &str, expr: &str) -> TransformError {
    TransformError::new(
        TransformErrorKind::ExpressionEvaluation,
        format!("{} failed: {}", label, err),
    )
    .with_path(path)
    .with_expr(expr)
}

pub fn compile_spec<'s>(
    spec: &'s TransformSpec,
    vars: &RuntimeVars,
) -> Result<CompiledSpec<'s>, TransformError> {
    let dialect = spec.input.input_type;
    let types = param_types(&spec.parameters);
    let resolve = |expr: &str, path: &str| {
        interpolate(expr, vars, dialect, Some(&types)).map_err(|err| interpolation_error(err, path))
    };

    let root = resolve(&spec.input.root, "input.root")?;

    let mut filters = Vec::with_capacity(spec.filters.len());
    for (index, filter) in spec.filters.iter().enumerate() {
        let path = format!("filters[{}]", index);
        let expr = resolve(&filter.expr, &format!("{}.expr", path))?;
        let label = match &filter.name {
            Some(name) => format!("filter '{}'", name),
            None => format!("filter {}", index),
        };
        let compiled = dialect::compile(dialect, &expr)
            .map_err(|err| expression_error(err, &path, &label, &expr))?;
        filters.push(CompiledStep {
            path,
            label,
            expr,
            compiled,
        });
    }

    let mut mappings = Vec::with_capacity(spec.mappings.len());
    for (index, mapping) in spec.mappings.iter().enumerate() {
        let path = format!("mappings[{}]", index);
        let expr = resolve(&mapping.expr, &format!("{}.expr", path))?;
        let label = format!("mapping '{}'", mapping.name);
        let compiled = dialect::compile(dialect, &expr)
            .map_err(|err| expression_error(err, &path, &label, &expr))?;
        mappings.push(CompiledStep {
            path,
            label,
            expr,
            compiled,
        });
    }

    Ok(CompiledSpec {
        spec,
        root,
        filters,
        mappings,
    })
}

// =============================================================================
// Row evaluation
// =============================================================================

/// Run every filter against `row`; `false` means the row is dropped.
fn passes_filters(
    compiled: &CompiledSpec<'_>,
    row: &Row<'_>,
    row_index: usize,
) -> Result<bool, TransformError> {
    for step in &compiled.filters {
        let passed = dialect::evaluate_filter(&step.compiled, row).map_err(|err| {
            expression_error(err, &step.path, &step.label, &step.expr).with_row(row_index)
        })?;
        if !passed {
            tracing::trace!("row {} dropped by {}", row_index, step.label);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate all mappings for `row`. `None` means the row was skipped under
/// `on_missing: skip_row`.
fn map_row(
    compiled: &CompiledSpec<'_>,
    row: &Row<'_>,
    row_index: usize,
) -> Result<Option<OutputRow>, TransformError> {
    let spec = compiled.spec;
    let mut out = OutputRow::new();
    for (mapping, step) in spec.mappings.iter().zip(&compiled.mappings) {
        let raw = dialect::evaluate(&step.compiled, row).map_err(|err| {
            expression_error(err, &step.path, &step.label, &step.expr).with_row(row_index)
        })?;
        let mut value = coerce(raw, mapping.value_type);
        if value.is_missing() {
            if let Some(default) = &mapping.default {
                value = EvalValue::Value(default.clone());
            }
        }
        match value {
            EvalValue::Value(v) => out.push(mapping.name.as_str(), v),
            EvalValue::Missing => match spec.defaults.on_missing {
                OnMissing::Null => out.push(mapping.name.as_str(), JsonValue::Null),
                OnMissing::SkipRow => {
                    tracing::trace!("row {} skipped: {} has no value", row_index, step.label);
                    return Ok(None);
                }
                OnMissing::Error => {
                    return Err(TransformError::new(
                        TransformErrorKind::MissingValue,
                        format!("{} produced no value for row {}", step.label, row_index),
                    )
                    .with_path(&step.path)
                    .with_row(row_index)
                    .with_expr(&step.expr));
                }
            },
        }
    }
    Ok(Some(out))
}

/// Select rows from `document` and run filters and mappings over each, in
/// document order.
pub fn evaluate_compiled(
    compiled: &CompiledSpec<'_>,
    document: &Document,
) -> Result<Vec<OutputRow>, TransformError> {
    let rows = dialect::select_root_rows(document, compiled.root())?;
    tracing::debug!("{} row(s) selected by root", rows.len());

    let mut out = Vec::new();
    for (row_index, row) in rows.iter().enumerate() {
        if !passes_filters(compiled, row, row_index)? {
            continue;
        }
        if let Some(mapped) = map_row(compiled, row, row_index)? {
            out.push(mapped);
        }
    }
    tracing::debug!("{} of {} row(s) survived", out.len(), rows.len());
    Ok(out)
}

/// Interpolate, compile and evaluate `spec` over an already parsed document.
pub fn evaluate_rows(
    spec: &TransformSpec,
    document: &Document,
    vars: &RuntimeVars,
) -> Result<Vec<OutputRow>, TransformError> {
    let compiled = compile_spec(spec, vars)?;
    evaluate_compiled(&compiled, document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::parse_document;
    use crate::model::InputType;
    use serde_json::json;

    fn spec(yaml: &str) -> TransformSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn vars(value: JsonValue) -> RuntimeVars {
        value.as_object().cloned().unwrap_or_default()
    }

    const PEOPLE: &str = r#"{"people": [
        {"name": "Ana", "age": "31", "active": "yes"},
        {"name": "Bo", "active": "no"},
        {"name": "Cy", "age": 19, "active": 1}
    ]}"#;

    #[test]
    fn coerces_numbers_and_booleans() {
        let v = |x: JsonValue| EvalValue::Value(x);
        assert_eq!(coerce(v(json!(" 42.5 ")), ValueType::Number), v(json!(42.5)));
        assert_eq!(coerce(v(json!("103")), ValueType::Number), v(json!(103)));
        assert_eq!(coerce(v(json!("n/a")), ValueType::Number), EvalValue::Missing);
        assert_eq!(coerce(v(json!(true)), ValueType::Number), EvalValue::Missing);
        assert_eq!(coerce(v(json!("Yes")), ValueType::Boolean), v(json!(true)));
        assert_eq!(coerce(v(json!("off")), ValueType::Boolean), v(json!(false)));
        assert_eq!(coerce(v(json!(0)), ValueType::Boolean), v(json!(false)));
        assert_eq!(coerce(v(json!("maybe")), ValueType::Boolean), EvalValue::Missing);
        assert_eq!(coerce(v(json!("2024-01-02")), ValueType::Date), v(json!("2024-01-02")));
        assert_eq!(coerce(EvalValue::Missing, ValueType::Any), EvalValue::Missing);
    }

    #[test]
    fn missing_values_become_null_by_default() {
        let spec = spec(
            r#"
version: 1
name: people
input: { type: json, root: "$.people[*]" }
output: { type: json }
mappings:
  - { name: name, expr: name }
  - { name: age, expr: age, type: number }
  - { name: active, expr: active, type: boolean }
"#,
        );
        let doc = parse_document(PEOPLE, InputType::Json).unwrap();
        let rows = evaluate_rows(&spec, &doc, &RuntimeVars::new()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].to_json(), json!({"name": "Ana", "age": 31, "active": true}));
        assert_eq!(rows[1].get("age"), Some(&JsonValue::Null));
        assert_eq!(rows[2].get("active"), Some(&json!(true)));
    }

    #[test]
    fn skip_row_drops_only_rows_with_missing_values() {
        let spec = spec(
            r#"
version: 1
name: people
input: { type: json, root: "$.people[*]" }
output: { type: json }
mappings:
  - { name: name, expr: name }
  - { name: age, expr: age, type: number }
defaults: { on_missing: skip_row }
"#,
        );
        let doc = parse_document(PEOPLE, InputType::Json).unwrap();
        let rows = evaluate_rows(&spec, &doc, &RuntimeVars::new()).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.get("name").cloned()).collect();
        assert_eq!(names, vec![Some(json!("Ana")), Some(json!("Cy"))]);
    }

    #[test]
    fn mapping_default_fills_before_policy() {
        let spec = spec(
            r#"
version: 1
name: people
input: { type: json, root: "$.people[*]" }
output: { type: json }
mappings:
  - { name: age, expr: age, type: number, default: 0 }
defaults: { on_missing: error }
"#,
        );
        let doc = parse_document(PEOPLE, InputType::Json).unwrap();
        let rows = evaluate_rows(&spec, &doc, &RuntimeVars::new()).unwrap();
        assert_eq!(rows[1].get("age"), Some(&json!(0)));
    }

    #[test]
    fn error_policy_fails_on_first_missing_value() {
        let spec = spec(
            r#"
version: 1
name: people
input: { type: json, root: "$.people[*]" }
output: { type: json }
mappings:
  - { name: age, expr: age, type: number }
defaults: { on_missing: error }
"#,
        );
        let doc = parse_document(PEOPLE, InputType::Json).unwrap();
        let err = evaluate_rows(&spec, &doc, &RuntimeVars::new()).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::MissingValue);
        assert_eq!(err.row_index, Some(1));
        assert_eq!(err.path.as_deref(), Some("mappings[0]"));
    }

    #[test]
    fn filters_short_circuit_and_use_vars() {
        let spec = spec(
            r#"
version: 1
name: people
input: { type: json, root: "$.people[*]" }
output: { type: json }
filters:
  - { name: has_age, expr: "age != null" }
  - { expr: "(age | tonumber) >= {{min_age}}" }
mappings:
  - { name: name, expr: name }
"#,
        );
        let doc = parse_document(PEOPLE, InputType::Json).unwrap();
        let rows = evaluate_rows(&spec, &doc, &vars(json!({"min_age": 20}))).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&json!("Ana")));
    }

    #[test]
    fn multi_result_filters_need_a_truthy_item() {
        let spec = spec(
            r#"
version: 1
name: tagged
input: { type: json, root: "$.items[*]" }
output: { type: json }
filters:
  - expr: '.tags[] == "x"'
mappings:
  - { name: id, expr: id }
"#,
        );
        let doc = parse_document(
            r#"{"items": [{"id": "a", "tags": ["y", "z"]}, {"id": "b", "tags": ["x"]}]}"#,
            InputType::Json,
        )
        .unwrap();
        let rows = evaluate_rows(&spec, &doc, &RuntimeVars::new()).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(json!("b"))]);
    }

    #[test]
    fn missing_variable_is_reported_with_its_path() {
        let spec_text = r#"
version: 1
name: people
input: { type: json, root: "$.people[*]" }
output: { type: json }
filters:
  - { expr: "age >= {{min_age}}" }
mappings:
  - { name: name, expr: name }
"#;
        let doc = parse_document(PEOPLE, InputType::Json).unwrap();
        let err = evaluate_rows(&spec(spec_text), &doc, &RuntimeVars::new()).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::MissingVariable);
        assert_eq!(err.path.as_deref(), Some("filters[0].expr"));

        // The value stays a string literal, so nothing matches.
        let rows = evaluate_rows(&spec(spec_text), &doc, &vars(json!({"min_age": "x) or (true"})))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn evaluation_failures_carry_row_and_expression() {
        let spec = spec(
            r#"
version: 1
name: people
input: { type: json, root: "$.people[*]" }
output: { type: json }
mappings:
  - { name: n, expr: "name | tonumber" }
"#,
        );
        let doc = parse_document(PEOPLE, InputType::Json).unwrap();
        let err = evaluate_rows(&spec, &doc, &RuntimeVars::new()).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::ExpressionEvaluation);
        assert_eq!(err.row_index, Some(0));
        assert_eq!(err.expr.as_deref(), Some("name | tonumber"));
        assert!(err.message.contains("mapping 'n'"));
    }
}
