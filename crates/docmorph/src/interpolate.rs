//! Runtime variable interpolation for dialect expressions.
//!
//! Placeholders are written `{{name}}`. Substitution happens in two passes:
//! [`scan_placeholders`] records every occurrence together with the character
//! immediately before and after it, then [`interpolate`] rewrites the
//! expression, rendering each value as a literal of the target dialect so the
//! substituted text can never be read as additional syntax.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::model::{InputType, ParamType, Parameter};
use crate::value::{number_text, number_value, value_text};

/// Variables supplied by the caller for one transform call.
pub type RuntimeVars = JsonMap<String, JsonValue>;

/// Declared parameter types, keyed by parameter name.
pub type ParamTypes = HashMap<String, ParamType>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpolateError {
    #[error("variable '{0}' is referenced but was not supplied")]
    MissingVariable(String),
}

/// One `{{name}}` occurrence and its surrounding characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    pub start: usize,
    pub end: usize,
    pub name: &'a str,
    pub before: Option<char>,
    pub after: Option<char>,
}

impl Placeholder<'_> {
    /// Quote character enclosing the placeholder, if it sits inside a literal.
    pub fn enclosing_quote(&self) -> Option<char> {
        match (self.before, self.after) {
            (Some(before), Some(after)) if before == after && (before == '"' || before == '\'') => {
                Some(before)
            }
            _ => None,
        }
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").expect("placeholder regex is valid")
    })
}

pub fn scan_placeholders(expr: &str) -> Vec<Placeholder<'_>> {
    placeholder_re()
        .captures_iter(expr)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some(Placeholder {
                start: whole.start(),
                end: whole.end(),
                name: name.as_str(),
                before: expr[..whole.start()].chars().next_back(),
                after: expr[whole.end()..].chars().next(),
            })
        })
        .collect()
}

pub fn has_placeholders(expr: &str) -> bool {
    placeholder_re().is_match(expr)
}

pub fn param_types(parameters: &[Parameter]) -> ParamTypes {
    parameters
        .iter()
        .map(|p| (p.name.clone(), p.param_type))
        .collect()
}

/// Substitute every placeholder of `expr` with the matching variable, quoted
/// for `dialect`.
pub fn interpolate(
    expr: &str,
    vars: &RuntimeVars,
    dialect: InputType,
    types: Option<&ParamTypes>,
) -> Result<String, InterpolateError> {
    let placeholders = scan_placeholders(expr);
    if placeholders.is_empty() {
        return Ok(expr.to_string());
    }

    let mut out = String::with_capacity(expr.len());
    let mut cursor = 0;
    for placeholder in &placeholders {
        // A closing quote already consumed by the previous placeholder does not count.
        let quote = placeholder
            .enclosing_quote()
            .filter(|_| placeholder.start > cursor);
        let raw = vars
            .get(placeholder.name)
            .ok_or_else(|| InterpolateError::MissingVariable(placeholder.name.to_string()))?;
        let declared = types.and_then(|t| t.get(placeholder.name)).copied();
        let value = coerce_to_param_type(raw, declared);

        if dialect == InputType::Xml && quote.is_some() {
            // XPath 1.0 literals cannot escape their quote, so the whole
            // literal is replaced.
            out.push_str(&expr[cursor..placeholder.start - 1]);
            out.push_str(&xpath_string_literal(&value_text(&value)));
            cursor = placeholder.end + 1;
        } else {
            out.push_str(&expr[cursor..placeholder.start]);
            out.push_str(&render_literal(&value, dialect, quote));
            cursor = placeholder.end;
        }
    }
    out.push_str(&expr[cursor..]);
    Ok(out)
}

/// Key names of `vars`, sorted, for logging which variables were supplied.
pub fn redact_vars(vars: &RuntimeVars) -> Vec<String> {
    let mut keys: Vec<String> = vars.keys().cloned().collect();
    keys.sort();
    keys
}

fn coerce_to_param_type(value: &JsonValue, declared: Option<ParamType>) -> JsonValue {
    match (declared, value) {
        (Some(ParamType::Number), JsonValue::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(number_value)
            .unwrap_or_else(|| value.clone()),
        (Some(ParamType::Boolean), JsonValue::String(s)) => {
            match s.trim().to_ascii_lowercase().as_str() {
                "true" => JsonValue::Bool(true),
                "false" => JsonValue::Bool(false),
                _ => value.clone(),
            }
        }
        (Some(ParamType::String), JsonValue::Number(_) | JsonValue::Bool(_)) => {
            JsonValue::String(value_text(value))
        }
        _ => value.clone(),
    }
}

fn render_literal(value: &JsonValue, dialect: InputType, quote: Option<char>) -> String {
    match dialect {
        InputType::Json => render_json_literal(value, quote),
        InputType::Xml => render_xpath_literal(value),
        InputType::Html => value_text(value),
    }
}

fn render_json_literal(value: &JsonValue, quote: Option<char>) -> String {
    match quote {
        Some('"') => {
            let text = value_text(value);
            let quoted = JsonValue::String(text).to_string();
            quoted[1..quoted.len() - 1].to_string()
        }
        _ => value.to_string(),
    }
}

fn render_xpath_literal(value: &JsonValue) -> String {
    match value {
        JsonValue::Number(n) => number_text(n),
        JsonValue::Bool(true) => "true()".to_string(),
        JsonValue::Bool(false) => "false()".to_string(),
        other => xpath_string_literal(&value_text(other)),
    }
}

/// Quote `s` as an XPath string expression. Values containing both quote
/// characters become a `concat()` of fragments split on the apostrophe.
pub fn xpath_string_literal(s: &str) -> String {
    if !s.contains('"') {
        return format!("\"{}\"", s);
    }
    if !s.contains('\'') {
        return format!("'{}'", s);
    }
    let mut parts = Vec::new();
    for (index, chunk) in s.split('\'').enumerate() {
        if index > 0 {
            parts.push("\"'\"".to_string());
        }
        if !chunk.is_empty() {
            parts.push(format!("'{}'", chunk));
        }
    }
    format!("concat({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: JsonValue) -> RuntimeVars {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn scan_records_context_characters() {
        let found = scan_placeholders(r#"name = "{{who}}" and {{n}}"#);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "who");
        assert_eq!(found[0].enclosing_quote(), Some('"'));
        assert_eq!(found[1].name, "n");
        assert_eq!(found[1].before, Some(' '));
        assert_eq!(found[1].after, None);
        assert_eq!(found[1].enclosing_quote(), None);
    }

    #[test]
    fn scan_ignores_malformed_placeholders() {
        assert!(scan_placeholders("{{1abc}} {{ spaced }} {single}").is_empty());
    }

    #[test]
    fn json_strings_become_quoted_literals() {
        let vars = vars(json!({"city": "Chi\"cago", "age": 30, "flag": true, "none": null}));
        let out = interpolate(
            "city == {{city}} and age >= {{age}} and {{flag}} and {{none}} == null",
            &vars,
            InputType::Json,
            None,
        )
        .unwrap();
        assert_eq!(
            out,
            r#"city == "Chi\"cago" and age >= 30 and true and null == null"#
        );
    }

    #[test]
    fn json_structured_values_use_canonical_json() {
        let vars = vars(json!({"ids": [1, 2], "obj": {"a": "b"}}));
        let out = interpolate("{{ids}} {{obj}}", &vars, InputType::Json, None).unwrap();
        assert_eq!(out, r#"[1,2] {"a":"b"}"#);
    }

    #[test]
    fn json_inside_double_quotes_escapes_in_place() {
        let vars = vars(json!({"v": "a\"b\\c"}));
        let out = interpolate(r#"name == "{{v}}""#, &vars, InputType::Json, None).unwrap();
        assert_eq!(out, r#"name == "a\"b\\c""#);
    }

    #[test]
    fn xpath_chooses_quote_by_content() {
        let vars = vars(json!({"plain": "abc", "dq": "say \"hi\"", "sq": "it's"}));
        let out = interpolate("{{plain}}|{{dq}}|{{sq}}", &vars, InputType::Xml, None).unwrap();
        assert_eq!(out, r#""abc"|'say "hi"'|"it's""#);
    }

    #[test]
    fn xpath_mixed_quotes_become_concat() {
        let literal = xpath_string_literal(r#"He said "it's" ok"#);
        assert_eq!(literal, r#"concat('He said "it', "'", 's" ok')"#);
        assert_eq!(xpath_string_literal(r#"'""#), r#"concat("'", '"')"#);
    }

    #[test]
    fn xpath_replaces_the_enclosing_literal() {
        let vars = vars(json!({"v": "O'Brien", "n": 7}));
        let out = interpolate("name = '{{v}}'", &vars, InputType::Xml, None).unwrap();
        assert_eq!(out, r#"name = "O'Brien""#);
        let out = interpolate(r#"code = "{{n}}""#, &vars, InputType::Xml, None).unwrap();
        assert_eq!(out, r#"code = "7""#);
        let out = interpolate("'{{v}}'{{n}}'", &vars, InputType::Xml, None).unwrap();
        assert_eq!(out, r#""O'Brien"7'"#);
    }

    #[test]
    fn xpath_numbers_and_booleans() {
        let vars = vars(json!({"n": 2.5, "t": true, "f": false}));
        let out = interpolate("{{n}} {{t}} {{f}}", &vars, InputType::Xml, None).unwrap();
        assert_eq!(out, "2.5 true() false()");
    }

    #[test]
    fn html_inserts_raw_text() {
        let vars = vars(json!({"cls": "item.active", "n": 3}));
        let out = interpolate("div.{{cls}}:nth-child({{n}})", &vars, InputType::Html, None).unwrap();
        assert_eq!(out, "div.item.active:nth-child(3)");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let err = interpolate("age > {{min_age}}", &RuntimeVars::new(), InputType::Json, None)
            .unwrap_err();
        assert_eq!(err, InterpolateError::MissingVariable("min_age".to_string()));
    }

    #[test]
    fn declared_types_coerce_text_values() {
        let vars = vars(json!({"min_age": "30", "on": "TRUE", "code": 7}));
        let types: ParamTypes = [
            ("min_age".to_string(), ParamType::Number),
            ("on".to_string(), ParamType::Boolean),
            ("code".to_string(), ParamType::String),
        ]
        .into_iter()
        .collect();
        let out = interpolate(
            "{{min_age}} {{on}} {{code}}",
            &vars,
            InputType::Json,
            Some(&types),
        )
        .unwrap();
        assert_eq!(out, r#"30 true "7""#);
    }

    #[test]
    fn redaction_returns_sorted_keys_only() {
        let vars = vars(json!({"token": "secret", "city": "Chicago"}));
        assert_eq!(redact_vars(&vars), vec!["city".to_string(), "token".to_string()]);
    }
}
