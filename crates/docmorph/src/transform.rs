use crate::dialect::parse_document;
use crate::error::{TransformError, TransformErrorKind};
use crate::evaluate::{evaluate_rows, OutputRow};
use crate::interpolate::{redact_vars, RuntimeVars};
use crate::model::TransformSpec;
use crate::render::render;
use crate::validator::validate_spec_shape;

/// Per-call knobs that are not part of the spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    pub limit: Option<usize>,
    pub preview_limit: Option<usize>,
}

impl TransformOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            preview_limit: None,
        }
    }

    /// Row cap applied after filtering. The smaller of the two limits wins.
    pub fn effective_limit(&self) -> Option<usize> {
        match (self.limit, self.preview_limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Parameter defaults overlaid by the caller's variables.
fn effective_vars(spec: &TransformSpec, vars: &RuntimeVars) -> RuntimeVars {
    let mut merged = RuntimeVars::new();
    for parameter in &spec.parameters {
        if let Some(default) = &parameter.default {
            merged.insert(parameter.name.clone(), default.clone());
        }
    }
    for (key, value) in vars {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// validate, parse, select, evaluate and truncate. Rendering is left to the caller.
pub fn transform_rows(
    spec: &TransformSpec,
    input: &str,
    vars: &RuntimeVars,
    options: &TransformOptions,
) -> Result<Vec<OutputRow>, TransformError> {
    validate_spec_shape(spec)?;

    let vars = effective_vars(spec, vars);
    tracing::debug!(
        "transform '{}' ({} input) with vars {:?}",
        spec.name,
        spec.input.input_type.as_str(),
        redact_vars(&vars)
    );

    let document = parse_document(input, spec.input.input_type)?;
    let mut rows = evaluate_rows(spec, &document, &vars)?;
    if let Some(limit) = options.effective_limit() {
        if rows.len() > limit {
            tracing::debug!("limit {} applied to {} row(s)", limit, rows.len());
            rows.truncate(limit);
        }
    }
    Ok(rows)
}

/// Run `spec` over `input` and render the surviving rows.
pub fn transform(
    spec: &TransformSpec,
    input: &str,
    vars: &RuntimeVars,
    options: &TransformOptions,
) -> Result<String, TransformError> {
    let rows = transform_rows(spec, input, vars, options)?;
    render(&rows, &spec.output, &spec.mapping_names())
}

pub fn transform_bytes(
    spec: &TransformSpec,
    input: &[u8],
    vars: &RuntimeVars,
    options: &TransformOptions,
) -> Result<String, TransformError> {
    let text = std::str::from_utf8(input).map_err(|err| {
        TransformError::new(
            TransformErrorKind::InvalidInput,
            format!("input is not valid UTF-8: {}", err),
        )
    })?;
    transform(spec, text, vars, options)
}

/// Parse and validate `spec_yaml`, then transform. Spec problems surface as
/// `SchemaValidation` with one detail line per error.
pub fn transform_text(
    spec_yaml: &str,
    input: &str,
    vars: &RuntimeVars,
    options: &TransformOptions,
) -> Result<String, TransformError> {
    let spec = crate::validator::validate_spec_text(spec_yaml)?;
    transform(&spec, input, vars, options)
}
