use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::dialect;
use crate::error::{ErrorCode, SpecError, ValidationResult};
use crate::interpolate::has_placeholders;
use crate::locator::YamlLocator;
use crate::model::{OutputType, TransformSpec, ValueType, SUPPORTED_VERSION};
use crate::render::is_valid_tag_name;

pub fn validate_spec(spec: &TransformSpec) -> ValidationResult {
    validate_spec_with_locator(spec, None, true)
}

/// Parse and validate spec text. Errors carry the YAML line and column of the
/// offending key.
pub fn validate_spec_text(source: &str) -> Result<TransformSpec, Vec<SpecError>> {
    let spec: TransformSpec = serde_yaml::from_str(source).map_err(|err| {
        let mut error = SpecError::new(ErrorCode::InvalidYaml, format!("invalid spec yaml: {}", err));
        if let Some(location) = err.location() {
            error = error.with_location(location.line(), location.column());
        }
        vec![error]
    })?;
    let locator = YamlLocator::from_str(source);
    validate_spec_with_locator(&spec, Some(&locator), true)?;
    Ok(spec)
}

/// Shape checks run at the start of every transform. Output options are left
/// to the renderer, which reports them as unsupported options.
pub(crate) fn validate_spec_shape(spec: &TransformSpec) -> ValidationResult {
    validate_spec_with_locator(spec, None, false)
}

fn validate_spec_with_locator(
    spec: &TransformSpec,
    locator: Option<&YamlLocator>,
    check_output: bool,
) -> ValidationResult {
    let mut ctx = ValidationCtx::new(locator);

    validate_header(spec, &mut ctx);
    validate_input(spec, &mut ctx);
    validate_mappings(spec, &mut ctx);
    validate_filters(spec, &mut ctx);
    validate_parameters(spec, &mut ctx);
    if check_output {
        validate_output(spec, &mut ctx);
    }

    ctx.finish()
}

fn validate_header(spec: &TransformSpec, ctx: &mut ValidationCtx<'_>) {
    if spec.version != SUPPORTED_VERSION {
        ctx.push(
            ErrorCode::InvalidVersion,
            &format!("version must be {}", SUPPORTED_VERSION),
            "version",
        );
    }
    if spec.name.trim().is_empty() {
        ctx.push(ErrorCode::MissingName, "name must be a non-empty string", "name");
    } else if !identifier_re().is_match(&spec.name) {
        ctx.push(
            ErrorCode::InvalidName,
            "name must match [A-Za-z_][A-Za-z0-9_]*",
            "name",
        );
    }
}

fn validate_input(spec: &TransformSpec, ctx: &mut ValidationCtx<'_>) {
    let root = &spec.input.root;
    if root.trim().is_empty() {
        ctx.push(
            ErrorCode::MissingRoot,
            "input.root must be a non-empty expression",
            "input.root",
        );
        return;
    }
    if has_placeholders(root) {
        return;
    }
    if let Err(err) = dialect::check_root(spec.input.input_type, root) {
        ctx.push(
            ErrorCode::InvalidExpr,
            &format!("input.root is not a valid {} root: {}", spec.input.input_type.as_str(), err),
            "input.root",
        );
    }
}

/// Compile `expr` unless it still contains placeholders; those are checked
/// after interpolation.
fn check_expr(spec: &TransformSpec, expr: &str, path: &str, ctx: &mut ValidationCtx<'_>) {
    if expr.trim().is_empty() {
        ctx.push(ErrorCode::MissingExpr, "expr must be a non-empty expression", path);
        return;
    }
    if has_placeholders(expr) {
        return;
    }
    if let Err(err) = dialect::compile(spec.input.input_type, expr) {
        ctx.push(
            ErrorCode::InvalidExpr,
            &format!("expr is not a valid {} expression: {}", spec.input.input_type.as_str(), err),
            path,
        );
    }
}

fn default_matches(value_type: ValueType, value: &JsonValue) -> bool {
    match value_type {
        ValueType::Any => true,
        ValueType::String | ValueType::Date => value.is_string(),
        ValueType::Number => value.is_number(),
        ValueType::Boolean => value.is_boolean(),
    }
}

fn validate_mappings(spec: &TransformSpec, ctx: &mut ValidationCtx<'_>) {
    if spec.mappings.is_empty() {
        ctx.push(
            ErrorCode::MissingMappings,
            "mappings must contain at least one mapping",
            "mappings",
        );
        return;
    }

    let mut seen = HashSet::new();
    for (index, mapping) in spec.mappings.iter().enumerate() {
        let base = format!("mappings[{}]", index);
        if mapping.name.trim().is_empty() {
            ctx.push(
                ErrorCode::MissingMappingName,
                "mapping name must be a non-empty string",
                format!("{}.name", base),
            );
        } else if !seen.insert(mapping.name.as_str()) {
            ctx.push(
                ErrorCode::DuplicateMappingName,
                &format!("mapping name '{}' is duplicated", mapping.name),
                format!("{}.name", base),
            );
        }

        check_expr(spec, &mapping.expr, &format!("{}.expr", base), ctx);

        if let Some(default) = &mapping.default {
            if !default_matches(mapping.value_type, default) {
                ctx.push(
                    ErrorCode::InvalidMappingDefault,
                    "default does not match the mapping type",
                    format!("{}.default", base),
                );
            }
        }
    }
}

fn validate_filters(spec: &TransformSpec, ctx: &mut ValidationCtx<'_>) {
    for (index, filter) in spec.filters.iter().enumerate() {
        check_expr(spec, &filter.expr, &format!("filters[{}].expr", index), ctx);
    }
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"))
}

fn validate_parameters(spec: &TransformSpec, ctx: &mut ValidationCtx<'_>) {
    let mut seen = HashSet::new();
    for (index, parameter) in spec.parameters.iter().enumerate() {
        let base = format!("parameters[{}]", index);
        if !identifier_re().is_match(&parameter.name) {
            ctx.push(
                ErrorCode::InvalidParameterName,
                "parameter name must match [A-Za-z_][A-Za-z0-9_]*",
                format!("{}.name", base),
            );
        } else if !seen.insert(parameter.name.as_str()) {
            ctx.push(
                ErrorCode::DuplicateParameter,
                &format!("parameter '{}' is declared more than once", parameter.name),
                format!("{}.name", base),
            );
        }
        if let Some(default) = &parameter.default {
            if !parameter.param_type.accepts(default) {
                ctx.push(
                    ErrorCode::InvalidParameterDefault,
                    "default does not match the parameter type",
                    format!("{}.default", base),
                );
            }
        }
    }
}

fn validate_output(spec: &TransformSpec, ctx: &mut ValidationCtx<'_>) {
    let options = &spec.output.options;
    let option_path = |key: &str| format!("output.options.{}", key);
    let expect_bool = |key: &str, ctx: &mut ValidationCtx<'_>| {
        if let Some(value) = options.get(key) {
            if !value.is_boolean() && !value.is_null() {
                ctx.push(
                    ErrorCode::InvalidOutputOption,
                    &format!("{} must be a boolean", key),
                    option_path(key),
                );
            }
        }
    };

    match spec.output.output_type {
        OutputType::Csv => {
            expect_bool("header", ctx);
            match options.get("delimiter") {
                None | Some(JsonValue::Null) => {}
                Some(JsonValue::String(delimiter)) => {
                    if delimiter.chars().count() != 1 {
                        ctx.push(
                            ErrorCode::InvalidDelimiterLength,
                            "delimiter must be a single character",
                            option_path("delimiter"),
                        );
                    } else if !delimiter.is_ascii() || matches!(delimiter.as_str(), "\"" | "\n" | "\r") {
                        ctx.push(
                            ErrorCode::InvalidOutputOption,
                            "delimiter must be an ASCII character other than a quote or newline",
                            option_path("delimiter"),
                        );
                    }
                }
                Some(_) => ctx.push(
                    ErrorCode::InvalidOutputOption,
                    "delimiter must be a string",
                    option_path("delimiter"),
                ),
            }
        }
        OutputType::Xml => {
            expect_bool("declaration", ctx);
            for key in ["root_tag", "row_tag"] {
                match options.get(key) {
                    None | Some(JsonValue::Null) => {}
                    Some(JsonValue::String(tag)) if is_valid_tag_name(tag) => {}
                    Some(_) => ctx.push(
                        ErrorCode::InvalidTagName,
                        &format!("{} must be a valid tag name", key),
                        option_path(key),
                    ),
                }
            }
            for (index, mapping) in spec.mappings.iter().enumerate() {
                if !mapping.name.is_empty() && !is_valid_tag_name(&mapping.name) {
                    ctx.push(
                        ErrorCode::InvalidTagName,
                        &format!("mapping name '{}' cannot be used as a tag name", mapping.name),
                        format!("mappings[{}].name", index),
                    );
                }
            }
        }
        OutputType::Text => {
            if spec.mappings.len() > 1 {
                ctx.push(
                    ErrorCode::TextOutputRequiresSingleMapping,
                    "text output requires exactly one mapping",
                    "mappings",
                );
            }
        }
        OutputType::Json => {}
    }
}

struct ValidationCtx<'a> {
    locator: Option<&'a YamlLocator>,
    errors: Vec<SpecError>,
}

impl<'a> ValidationCtx<'a> {
    fn new(locator: Option<&'a YamlLocator>) -> Self {
        Self {
            locator,
            errors: Vec::new(),
        }
    }

    fn push(&mut self, code: ErrorCode, message: &str, path: impl Into<String>) {
        let path = path.into();
        let mut err = SpecError::new(code, message).with_path(path.clone());
        if let Some(locator) = self.locator {
            if let Some(location) = locator.location_for(&path) {
                err = err.with_location(location.line, location.column);
            }
        }
        self.errors.push(err);
    }

    fn finish(self) -> ValidationResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
