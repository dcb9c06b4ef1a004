use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;
use sxd_xpath::nodeset::Node;
use sxd_xpath::Value as XValue;

use crate::css::{self, CssError, CssQuery};
use crate::error::{TransformError, TransformErrorKind};
use crate::model::InputType;
use crate::query::{self, Query, QueryError};
use crate::value::{is_truthy, number_value, EvalValue};
use crate::xpath::{self, XPathError, XPathExpr};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DialectError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    XPath(#[from] XPathError),
    #[error(transparent)]
    Css(#[from] CssError),
    #[error("{expr} expression cannot be evaluated against a {row} row")]
    Mismatch {
        expr: &'static str,
        row: &'static str,
    },
}

/// A parsed input document. The variant fixes the dialect of every
/// expression evaluated against it.
pub enum Document {
    Json(JsonValue),
    Xml(sxd_document::Package),
    Html(Html),
}

/// One selected row, borrowed from its [`Document`].
#[derive(Debug, Clone)]
pub enum Row<'d> {
    Json(JsonValue),
    Xml(Node<'d>),
    Html(ElementRef<'d>),
}

impl Row<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Row::Json(_) => "json",
            Row::Xml(_) => "xml",
            Row::Html(_) => "html",
        }
    }
}

/// An expression compiled once for its dialect and evaluated per row.
#[derive(Debug)]
pub enum CompiledExpr {
    Json(Query),
    Xml(XPathExpr),
    Html(CssQuery),
}

impl CompiledExpr {
    fn kind(&self) -> &'static str {
        match self {
            CompiledExpr::Json(_) => "json",
            CompiledExpr::Xml(_) => "xml",
            CompiledExpr::Html(_) => "html",
        }
    }
}

pub fn parse_document(input: &str, input_type: InputType) -> Result<Document, TransformError> {
    match input_type {
        InputType::Json => {
            let value: JsonValue = serde_json::from_str(input)?;
            Ok(Document::Json(value))
        }
        InputType::Xml => xpath::parse_xml(input)
            .map(Document::Xml)
            .map_err(|err| {
                TransformError::new(
                    TransformErrorKind::InvalidInput,
                    format!("xml error: {}", err),
                )
            }),
        InputType::Html => Ok(Document::Html(Html::parse_document(input))),
    }
}

pub fn compile(dialect: InputType, expr: &str) -> Result<CompiledExpr, DialectError> {
    Ok(match dialect {
        InputType::Json => CompiledExpr::Json(query::parse_query(expr)?),
        InputType::Xml => CompiledExpr::Xml(xpath::parse_xpath(expr)?),
        InputType::Html => CompiledExpr::Html(css::parse_css(expr)?),
    })
}

/// Check that `expr` is a well-formed root expression for `dialect`.
pub fn check_root(dialect: InputType, expr: &str) -> Result<(), DialectError> {
    match dialect {
        InputType::Json => query::parse_query(expr).map(|_| ())?,
        InputType::Xml => xpath::parse_xpath(expr).map(|_| ())?,
        InputType::Html => css::parse_root_selector(expr).map(|_| ())?,
    }
    Ok(())
}

fn root_error(root: &str, err: impl std::fmt::Display) -> TransformError {
    TransformError::new(
        TransformErrorKind::InvalidRootSelection,
        format!("root selection failed: {}", err),
    )
    .with_path("input.root")
    .with_expr(root)
}

/// Resolve `root` against `document` into the row sequence.
///
/// The json dialect is tolerant: a single non-array result becomes one row,
/// an array result is iterated and `null` yields no rows. The xml dialect
/// requires a node-set. The html dialect treats zero matches as no rows.
pub fn select_root_rows<'d>(
    document: &'d Document,
    root: &str,
) -> Result<Vec<Row<'d>>, TransformError> {
    match document {
        Document::Json(value) => {
            let parsed = query::parse_query(root).map_err(|err| root_error(root, err))?;
            let mut results =
                query::eval_query(&parsed, value).map_err(|err| root_error(root, err))?;
            let values = if results.len() == 1 {
                match results.pop() {
                    Some(JsonValue::Array(items)) => items,
                    Some(JsonValue::Null) | None => Vec::new(),
                    Some(other) => vec![other],
                }
            } else {
                results
            };
            Ok(values.into_iter().map(Row::Json).collect())
        }
        Document::Xml(package) => {
            let parsed = xpath::parse_xpath(root).map_err(|err| root_error(root, err))?;
            let nodes = xpath::select_nodes(&parsed, &package.as_document())
                .map_err(|err| root_error(root, err))?;
            Ok(nodes.into_iter().map(Row::Xml).collect())
        }
        Document::Html(html) => {
            let selector = css::parse_root_selector(root).map_err(|err| root_error(root, err))?;
            Ok(css::select_elements(html, &selector)
                .into_iter()
                .map(Row::Html)
                .collect())
        }
    }
}

fn xpath_result(value: XValue<'_>) -> EvalValue {
    match value {
        XValue::Nodeset(nodes) => EvalValue::from_many(
            nodes
                .document_order()
                .iter()
                .map(|n| JsonValue::String(n.string_value()))
                .collect(),
        ),
        XValue::String(s) => EvalValue::Value(JsonValue::String(s)),
        XValue::Number(n) => match number_value(n) {
            Some(v) => EvalValue::Value(v),
            None => EvalValue::Missing,
        },
        XValue::Boolean(b) => EvalValue::Value(JsonValue::Bool(b)),
    }
}

/// Evaluate a compiled expression relative to one row.
pub fn evaluate(expr: &CompiledExpr, row: &Row<'_>) -> Result<EvalValue, DialectError> {
    match (expr, row) {
        (CompiledExpr::Json(q), Row::Json(value)) => {
            Ok(EvalValue::from_many(query::eval_query(q, value)?))
        }
        (CompiledExpr::Xml(x), Row::Xml(node)) => {
            Ok(xpath_result(xpath::evaluate(x, *node)?))
        }
        (CompiledExpr::Html(c), Row::Html(element)) => Ok(EvalValue::from_many(
            css::evaluate_css(c, *element)
                .into_iter()
                .map(JsonValue::String)
                .collect(),
        )),
        _ => Err(mismatch(expr, row)),
    }
}

/// Evaluate a filter relative to one row. A json or html result stream passes
/// when any item is truthy; xml uses the XPath boolean value of the result.
pub fn evaluate_filter(expr: &CompiledExpr, row: &Row<'_>) -> Result<bool, DialectError> {
    match (expr, row) {
        (CompiledExpr::Json(q), Row::Json(value)) => Ok(query::eval_query(q, value)?
            .into_iter()
            .any(|item| is_truthy(&EvalValue::Value(item)))),
        (CompiledExpr::Xml(x), Row::Xml(node)) => Ok(xpath::evaluate(x, *node)?.boolean()),
        (CompiledExpr::Html(c), Row::Html(element)) => Ok(css::evaluate_css(c, *element)
            .iter()
            .any(|text| !text.is_empty())),
        _ => Err(mismatch(expr, row)),
    }
}

fn mismatch(expr: &CompiledExpr, row: &Row<'_>) -> DialectError {
    DialectError::Mismatch {
        expr: expr.kind(),
        row: row.kind(),
    }
}
