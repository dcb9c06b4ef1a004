#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidYaml,
    InvalidVersion,
    MissingName,
    InvalidName,
    MissingRoot,

    MissingMappings,
    MissingMappingName,
    DuplicateMappingName,
    MissingExpr,
    InvalidExpr,
    InvalidMappingDefault,

    InvalidDelimiterLength,
    InvalidOutputOption,
    InvalidTagName,
    TextOutputRequiresSingleMapping,

    InvalidParameterName,
    DuplicateParameter,
    InvalidParameterDefault,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidYaml => "InvalidYaml",
            ErrorCode::InvalidVersion => "InvalidVersion",
            ErrorCode::MissingName => "MissingName",
            ErrorCode::InvalidName => "InvalidName",
            ErrorCode::MissingRoot => "MissingRoot",
            ErrorCode::MissingMappings => "MissingMappings",
            ErrorCode::MissingMappingName => "MissingMappingName",
            ErrorCode::DuplicateMappingName => "DuplicateMappingName",
            ErrorCode::MissingExpr => "MissingExpr",
            ErrorCode::InvalidExpr => "InvalidExpr",
            ErrorCode::InvalidMappingDefault => "InvalidMappingDefault",
            ErrorCode::InvalidDelimiterLength => "InvalidDelimiterLength",
            ErrorCode::InvalidOutputOption => "InvalidOutputOption",
            ErrorCode::InvalidTagName => "InvalidTagName",
            ErrorCode::TextOutputRequiresSingleMapping => "TextOutputRequiresSingleMapping",
            ErrorCode::InvalidParameterName => "InvalidParameterName",
            ErrorCode::DuplicateParameter => "DuplicateParameter",
            ErrorCode::InvalidParameterDefault => "InvalidParameterDefault",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlLocation {
    pub line: usize,
    pub column: usize,
}

/// One schema problem found while validating a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecError {
    pub code: ErrorCode,
    pub message: String,
    pub location: Option<YamlLocation>,
    pub path: Option<String>,
}

impl SpecError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            location: None,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_location(mut self, line: usize, column: usize) -> Self {
        self.location = Some(YamlLocation { line, column });
        self
    }
}

impl std::fmt::Display for SpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        if let Some(location) = &self.location {
            write!(f, " (line {}, column {})", location.line, location.column)?;
        }
        Ok(())
    }
}

pub type ValidationResult = Result<(), Vec<SpecError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    SchemaValidation,
    InvalidInput,
    InvalidRootSelection,
    ExpressionEvaluation,
    MissingVariable,
    MissingValue,
    UnsupportedOutputOption,
}

impl TransformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformErrorKind::SchemaValidation => "SchemaValidation",
            TransformErrorKind::InvalidInput => "InvalidInput",
            TransformErrorKind::InvalidRootSelection => "InvalidRootSelection",
            TransformErrorKind::ExpressionEvaluation => "ExpressionEvaluation",
            TransformErrorKind::MissingVariable => "MissingVariable",
            TransformErrorKind::MissingValue => "MissingValue",
            TransformErrorKind::UnsupportedOutputOption => "UnsupportedOutputOption",
        }
    }
}

/// Terminal failure of a single `transform` call.
///
/// `path` names the spec element involved (`mappings[2]`, `filters[0]`,
/// `output.options.delimiter`), `row_index` the zero-based selected row and
/// `expr` the expression text after interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub kind: TransformErrorKind,
    pub message: String,
    pub path: Option<String>,
    pub row_index: Option<usize>,
    pub expr: Option<String>,
    pub details: Vec<String>,
}

impl TransformError {
    pub fn new(kind: TransformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            row_index: None,
            expr: None,
            details: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_row(mut self, row_index: usize) -> Self {
        self.row_index = Some(row_index);
        self
    }

    pub fn with_expr(mut self, expr: impl Into<String>) -> Self {
        self.expr = Some(expr.into());
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path)?;
        }
        if let Some(row) = self.row_index {
            write!(f, " (row: {})", row)?;
        }
        if let Some(expr) = &self.expr {
            write!(f, " (expr: {})", expr)?;
        }
        for detail in &self.details {
            write!(f, "\n  - {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for TransformError {}

impl From<Vec<SpecError>> for TransformError {
    fn from(errors: Vec<SpecError>) -> Self {
        let details = errors.iter().map(|err| err.to_string()).collect();
        TransformError::new(
            TransformErrorKind::SchemaValidation,
            format!("spec is invalid ({} error(s))", errors.len()),
        )
        .with_details(details)
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        TransformError::new(
            TransformErrorKind::InvalidInput,
            format!("json error: {}", err),
        )
    }
}
