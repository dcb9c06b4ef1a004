use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{TransformError, TransformErrorKind};
use crate::evaluate::OutputRow;
use crate::model::{OutputSpec, OutputType};
use crate::value::value_text;

const DEFAULT_ROOT_TAG: &str = "rows";
const DEFAULT_ROW_TAG: &str = "row";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

fn option_error(key: &str, message: impl Into<String>) -> TransformError {
    TransformError::new(TransformErrorKind::UnsupportedOutputOption, message)
        .with_path(format!("output.options.{}", key))
}

fn bool_option(
    options: &JsonMap<String, JsonValue>,
    key: &str,
    default: bool,
) -> Result<bool, TransformError> {
    match options.get(key) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(other) => Err(option_error(
            key,
            format!("option '{}' must be a boolean, got {}", key, other),
        )),
    }
}

fn str_option<'o>(
    options: &'o JsonMap<String, JsonValue>,
    key: &str,
    default: &'o str,
) -> Result<&'o str, TransformError> {
    match options.get(key) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(JsonValue::String(s)) => Ok(s.as_str()),
        Some(other) => Err(option_error(
            key,
            format!("option '{}' must be a string, got {}", key, other),
        )),
    }
}

fn tag_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9._-]*$").expect("tag regex is valid"))
}

/// Whether `name` can be used as an element name in tagged output.
pub fn is_valid_tag_name(name: &str) -> bool {
    tag_name_re().is_match(name) && !name.to_ascii_lowercase().starts_with("xml")
}

/// The csv delimiter byte for `options`, rejecting anything but one ASCII character.
pub fn csv_delimiter(options: &JsonMap<String, JsonValue>) -> Result<u8, TransformError> {
    let delimiter = str_option(options, "delimiter", ",")?;
    let mut chars = delimiter.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() && c != '"' && c != '\n' && c != '\r' => Ok(c as u8),
        (Some(_), None) => Err(option_error(
            "delimiter",
            format!("delimiter '{}' cannot be used", delimiter),
        )),
        _ => Err(option_error(
            "delimiter",
            format!(
                "delimiter must be exactly one character, got {} characters",
                delimiter.chars().count()
            ),
        )),
    }
}

fn csv_error(err: impl std::fmt::Display) -> TransformError {
    TransformError::new(
        TransformErrorKind::UnsupportedOutputOption,
        format!("csv write failed: {}", err),
    )
}

/// One csv line without its terminator. A record made of a single empty field
/// is an empty line rather than `""`.
fn csv_line(builder: &csv::WriterBuilder, fields: &[String]) -> Result<String, TransformError> {
    if let [only] = fields {
        if only.is_empty() {
            return Ok(String::new());
        }
    }
    let mut writer = builder.from_writer(Vec::new());
    writer.write_record(fields).map_err(csv_error)?;
    let bytes = writer.into_inner().map_err(csv_error)?;
    let mut line = String::from_utf8(bytes).map_err(csv_error)?;
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

fn render_csv(
    rows: &[OutputRow],
    options: &JsonMap<String, JsonValue>,
    mapping_names: &[&str],
) -> Result<String, TransformError> {
    let delimiter = csv_delimiter(options)?;
    let header = bool_option(options, "header", true)?;

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'));

    let mut lines = Vec::with_capacity(rows.len() + 1);
    if header {
        let names: Vec<String> = mapping_names.iter().map(|name| name.to_string()).collect();
        lines.push(csv_line(&builder, &names)?);
    }
    for row in rows {
        let fields: Vec<String> = row.iter().map(|(_, value)| value_text(value)).collect();
        lines.push(csv_line(&builder, &fields)?);
    }
    Ok(lines.join("\n"))
}

fn render_json(rows: &[OutputRow]) -> Result<String, TransformError> {
    let array = JsonValue::Array(rows.iter().map(OutputRow::to_json).collect());
    serde_json::to_string_pretty(&array).map_err(|err| {
        TransformError::new(
            TransformErrorKind::UnsupportedOutputOption,
            format!("json write failed: {}", err),
        )
    })
}

fn tag_option<'o>(
    options: &'o JsonMap<String, JsonValue>,
    key: &str,
    default: &'o str,
) -> Result<&'o str, TransformError> {
    let tag = str_option(options, key, default)?;
    if !is_valid_tag_name(tag) {
        return Err(option_error(key, format!("'{}' is not a valid tag name", tag)));
    }
    Ok(tag)
}

fn render_xml(
    rows: &[OutputRow],
    options: &JsonMap<String, JsonValue>,
    mapping_names: &[&str],
) -> Result<String, TransformError> {
    let root_tag = tag_option(options, "root_tag", DEFAULT_ROOT_TAG)?;
    let row_tag = tag_option(options, "row_tag", DEFAULT_ROW_TAG)?;
    let declaration = bool_option(options, "declaration", false)?;
    for (index, name) in mapping_names.iter().enumerate() {
        if !is_valid_tag_name(name) {
            return Err(TransformError::new(
                TransformErrorKind::UnsupportedOutputOption,
                format!("mapping name '{}' is not a valid tag name", name),
            )
            .with_path(format!("mappings[{}].name", index)));
        }
    }

    let mut lines = Vec::new();
    if declaration {
        lines.push(XML_DECLARATION.to_string());
    }
    if rows.is_empty() {
        lines.push(format!("<{}/>", root_tag));
        return Ok(lines.join("\n"));
    }

    lines.push(format!("<{}>", root_tag));
    for row in rows {
        lines.push(format!("  <{}>", row_tag));
        for (name, value) in row.iter() {
            match value {
                JsonValue::Null => lines.push(format!("    <{}/>", name)),
                other => {
                    let text = value_text(other);
                    lines.push(format!(
                        "    <{}>{}</{}>",
                        name,
                        quick_xml::escape::escape(text.as_str()),
                        name
                    ));
                }
            }
        }
        lines.push(format!("  </{}>", row_tag));
    }
    lines.push(format!("</{}>", root_tag));
    Ok(lines.join("\n"))
}

fn render_text(rows: &[OutputRow], mapping_names: &[&str]) -> Result<String, TransformError> {
    if mapping_names.len() != 1 {
        return Err(TransformError::new(
            TransformErrorKind::UnsupportedOutputOption,
            format!(
                "text output needs exactly one mapping, spec has {}",
                mapping_names.len()
            ),
        )
        .with_path("mappings"));
    }
    let lines: Vec<String> = rows
        .iter()
        .map(|row| row.iter().next().map(|(_, v)| value_text(v)).unwrap_or_default())
        .collect();
    Ok(lines.join("\n"))
}

/// Serialize `rows` in the format of `output`.
pub fn render(
    rows: &[OutputRow],
    output: &OutputSpec,
    mapping_names: &[&str],
) -> Result<String, TransformError> {
    match output.output_type {
        OutputType::Csv => render_csv(rows, &output.options, mapping_names),
        OutputType::Json => render_json(rows),
        OutputType::Xml => render_xml(rows, &output.options, mapping_names),
        OutputType::Text => render_text(rows, mapping_names),
    }
}
