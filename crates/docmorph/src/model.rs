use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const SUPPORTED_VERSION: u8 = 1;

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TransformSpec {
    pub version: u8,
    pub name: String,
    pub input: InputSpec,
    pub output: OutputSpec,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl TransformSpec {
    pub fn mapping_names(&self) -> Vec<&str> {
        self.mappings.iter().map(|m| m.name.as_str()).collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub root: String,
}

/// Input document kind. Also selects the expression dialect used by every
/// mapping and filter of the spec.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[serde(alias = "structured")]
    Json,
    #[serde(alias = "path-markup")]
    Xml,
    #[serde(alias = "scrape-markup")]
    Html,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Json => "json",
            InputType::Xml => "xml",
            InputType::Html => "html",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    #[serde(rename = "type")]
    pub output_type: OutputType,
    #[serde(default)]
    pub options: JsonMap<String, JsonValue>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[serde(alias = "delimited")]
    Csv,
    #[serde(alias = "structured")]
    Json,
    #[serde(alias = "tagged-markup")]
    Xml,
    #[serde(alias = "plain")]
    Text,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Mapping {
    pub name: String,
    pub expr: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub default: Option<JsonValue>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Date,
    #[default]
    Any,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    #[serde(default)]
    pub name: Option<String>,
    pub expr: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default)]
    pub on_missing: OnMissing,
}

/// What to do when a mapping expression yields no value for a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnMissing {
    #[default]
    Null,
    SkipRow,
    Error,
}

// `on_missing: null` arrives as a YAML null rather than the string "null".
impl<'de> Deserialize<'de> for OnMissing {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("null") => Ok(OnMissing::Null),
            Some("skip_row") => Ok(OnMissing::SkipRow),
            Some("error") => Ok(OnMissing::Error),
            Some(other) => Err(D::Error::unknown_variant(
                other,
                &["null", "skip_row", "error"],
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<JsonValue>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    #[default]
    Any,
}

impl ParamType {
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Any => true,
        }
    }
}
