//! Path-markup dialect: XPath 1.0 over `sxd_document` trees, compiled and
//! evaluated by `sxd_xpath`.

use std::fmt;

use sxd_document::{dom, Package};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value, XPath};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum XPathError {
    #[error("invalid xpath '{expr}': {message}")]
    Syntax { expr: String, message: String },
    #[error("xpath '{expr}' failed: {message}")]
    Evaluation { expr: String, message: String },
    #[error("xpath '{0}' does not select a node-set")]
    NotNodeSet(String),
}

/// A compiled path expression together with its source text.
pub struct XPathExpr {
    source: String,
    compiled: XPath,
}

impl XPathExpr {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for XPathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("XPathExpr").field(&self.source).finish()
    }
}

pub fn parse_xpath(expr: &str) -> Result<XPathExpr, XPathError> {
    let compiled = Factory::new()
        .build(expr)
        .map_err(|err| XPathError::Syntax {
            expr: expr.to_string(),
            message: err.to_string(),
        })?
        .ok_or_else(|| XPathError::Syntax {
            expr: expr.to_string(),
            message: "empty expression".to_string(),
        })?;
    Ok(XPathExpr {
        source: expr.to_string(),
        compiled,
    })
}

pub fn parse_xml(input: &str) -> Result<Package, sxd_document::parser::Error> {
    sxd_document::parser::parse(input)
}

/// Evaluate `expr` with `node` as the context node.
pub fn evaluate<'d>(expr: &XPathExpr, node: Node<'d>) -> Result<Value<'d>, XPathError> {
    let context = Context::new();
    expr.compiled
        .evaluate(&context, node)
        .map_err(|err| XPathError::Evaluation {
            expr: expr.source.clone(),
            message: err.to_string(),
        })
}

/// Evaluate a root expression against the document node. The result must be
/// a node-set; an attribute in it stands for its owner element.
pub fn select_nodes<'d>(
    expr: &XPathExpr,
    document: &dom::Document<'d>,
) -> Result<Vec<Node<'d>>, XPathError> {
    match evaluate(expr, Node::Root(document.root()))? {
        Value::Nodeset(nodes) => Ok(nodes
            .document_order()
            .into_iter()
            .map(|node| match node {
                Node::Attribute(attr) => attr.parent().map(Node::Element).unwrap_or(node),
                other => other,
            })
            .collect()),
        _ => Err(XPathError::NotNodeSet(expr.source.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
<catalog>
  <book id="b1" lang="en"><title>Rust</title><price>30</price></book>
  <book id="b2" lang="fr"><title>L'été</title><price>12.5</price></book>
  <book id="b3"><title>Say "hi"</title><price>45</price></book>
</catalog>"#;

    fn value_at_root(package: &Package, expr: &str) -> String {
        let document = package.as_document();
        let parsed = parse_xpath(expr).unwrap();
        match evaluate(&parsed, Node::Root(document.root())).unwrap() {
            Value::Nodeset(nodes) => nodes
                .document_order()
                .iter()
                .map(|n| n.string_value())
                .collect::<Vec<_>>()
                .join("|"),
            other => other.string(),
        }
    }

    #[test]
    fn selects_paths_predicates_and_functions() {
        let package = parse_xml(DOC).unwrap();
        assert_eq!(value_at_root(&package, "/catalog/book/@id"), "b1|b2|b3");
        assert_eq!(value_at_root(&package, "//book[@lang='fr']/price"), "12.5");
        assert_eq!(value_at_root(&package, "//book[price > 20]/@id"), "b1|b3");
        assert_eq!(value_at_root(&package, "count(//book[not(@lang)])"), "1");
        assert_eq!(
            value_at_root(&package, r#"//book[title = concat('Say ', '"hi"')]/@id"#),
            "b3"
        );
    }

    #[test]
    fn rows_are_element_nodes_in_document_order() {
        let package = parse_xml(DOC).unwrap();
        let document = package.as_document();
        let rows = select_nodes(&parse_xpath("//book/@id").unwrap(), &document).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|n| matches!(n, Node::Element(_))));

        let title = evaluate(&parse_xpath("title").unwrap(), rows[2]).unwrap();
        assert_eq!(title.string(), "Say \"hi\"");
    }

    #[test]
    fn scalar_roots_and_bad_syntax_are_errors() {
        let package = parse_xml(DOC).unwrap();
        let document = package.as_document();
        let err = select_nodes(&parse_xpath("count(//book)").unwrap(), &document).unwrap_err();
        assert!(matches!(err, XPathError::NotNodeSet(_)));
        assert!(matches!(parse_xpath("//book["), Err(XPathError::Syntax { .. })));
    }
}
