mod dialect;
mod error;
mod evaluate;
mod locator;
mod model;
mod render;
mod transform;
mod validator;
mod value;
pub mod css;
pub mod interpolate;
pub mod query;
pub mod xpath;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use dialect::{
    check_root, compile, evaluate, evaluate_filter, parse_document, select_root_rows, CompiledExpr,
    DialectError, Document, Row,
};
pub use error::{
    ErrorCode, SpecError, TransformError, TransformErrorKind, ValidationResult, YamlLocation,
};
pub use evaluate::{coerce, evaluate_rows, OutputRow};
pub use interpolate::{interpolate, redact_vars, InterpolateError, ParamTypes, RuntimeVars};
pub use locator::YamlLocator;
pub use model::{
    Defaults, Filter, InputSpec, InputType, Mapping, OnMissing, OutputSpec, OutputType, ParamType,
    Parameter, TransformSpec, ValueType, SUPPORTED_VERSION,
};
pub use render::{is_valid_tag_name, render};
pub use transform::{transform, transform_bytes, transform_rows, transform_text, TransformOptions};
pub use validator::{validate_spec, validate_spec_text};
pub use value::EvalValue;

pub fn parse_spec(yaml: &str) -> Result<TransformSpec, serde_yaml::Error> {
    serde_yaml::from_str(yaml)
}
