use serde_json::{Number, Value as JsonValue};

/// Evaluation result - either a value or missing
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Missing,
    Value(JsonValue),
}

impl EvalValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, EvalValue::Missing)
    }

    /// Collapse a dialect result list: nothing is missing, one item is itself,
    /// several become an array.
    pub fn from_many(mut values: Vec<JsonValue>) -> Self {
        match values.len() {
            0 => EvalValue::Missing,
            1 => match values.pop() {
                Some(JsonValue::Null) | None => EvalValue::Missing,
                Some(value) => EvalValue::Value(value),
            },
            _ => EvalValue::Value(JsonValue::Array(values)),
        }
    }
}

/// Check if a value is truthy
pub fn is_truthy(value: &EvalValue) -> bool {
    match value {
        EvalValue::Missing => false,
        EvalValue::Value(v) => match v {
            JsonValue::Null => false,
            JsonValue::Bool(b) => *b,
            JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            JsonValue::String(s) => !s.is_empty(),
            JsonValue::Array(arr) => !arr.is_empty(),
            JsonValue::Object(obj) => !obj.is_empty(),
        },
    }
}

/// Build a JSON number, keeping integral values integral so `103.0` renders as `103`.
pub fn number_value(f: f64) -> Option<JsonValue> {
    if !f.is_finite() {
        return None;
    }
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        return Some(JsonValue::Number(Number::from(f as i64)));
    }
    Number::from_f64(f).map(JsonValue::Number)
}

/// Canonical text of a number without exponent notation.
pub fn number_text(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        n.as_f64().map(|f| f.to_string()).unwrap_or_default()
    }
}

/// Plain text form used by renderers and by text-only dialects.
pub fn value_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => number_text(n),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}
