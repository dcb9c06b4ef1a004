//! Scrape-markup dialect: CSS selectors evaluated with `scraper`.
//!
//! An expression is `<selector>` optionally followed by an extraction suffix:
//! `::text` (default, whitespace-trimmed text), `::html` (outer markup) or
//! `::attr(name)`. An empty selector addresses the row element itself, so
//! `::attr(href)` reads an attribute of the row.

use scraper::{ElementRef, Html, Selector};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CssError {
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("unknown extraction '::{0}', expected ::text, ::html or ::attr(name)")]
    UnknownExtraction(String),
    #[error("root selector cannot use an extraction suffix")]
    RootExtraction,
    #[error("root selector must not be empty")]
    EmptyRoot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    Text,
    Html,
    Attr(String),
}

#[derive(Debug, Clone)]
pub struct CssQuery {
    selector: Option<Selector>,
    extract: Extract,
}

impl CssQuery {
    pub fn extract(&self) -> &Extract {
        &self.extract
    }
}

/// Split a trailing `::text`, `::html` or `::attr(name)` off `expr`. A `::`
/// inside brackets or quotes belongs to the selector.
fn split_extraction(expr: &str) -> Result<(&str, Option<Extract>), CssError> {
    if let Some(selector) = expr.strip_suffix("::text") {
        return Ok((selector, Some(Extract::Text)));
    }
    if let Some(selector) = expr.strip_suffix("::html") {
        return Ok((selector, Some(Extract::Html)));
    }
    if let Some(index) = expr.strip_suffix(')').and_then(|rest| rest.rfind("::attr(")) {
        let name = expr[index + "::attr(".len()..expr.len() - 1].trim();
        if !name.is_empty() {
            return Ok((&expr[..index], Some(Extract::Attr(name.to_string()))));
        }
    }
    if let Some(index) = expr.rfind("::") {
        let suffix = &expr[index + 2..];
        if !suffix.contains(['"', '\'', ']']) {
            return Err(CssError::UnknownExtraction(suffix.trim().to_string()));
        }
    }
    Ok((expr, None))
}

fn parse_selector(selector: &str) -> Result<Selector, CssError> {
    Selector::parse(selector).map_err(|err| CssError::InvalidSelector {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}

pub fn parse_css(expr: &str) -> Result<CssQuery, CssError> {
    let (selector, extract) = split_extraction(expr.trim())?;
    let extract = extract.unwrap_or(Extract::Text);
    let selector = selector.trim();
    let selector = if selector.is_empty() {
        None
    } else {
        Some(parse_selector(selector)?)
    };
    Ok(CssQuery { selector, extract })
}

/// Compile a root selector. Extraction suffixes are rejected because a root
/// must produce elements.
pub fn parse_root_selector(expr: &str) -> Result<Selector, CssError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(CssError::EmptyRoot);
    }
    match split_extraction(trimmed) {
        Ok((selector, None)) => parse_selector(selector),
        _ => Err(CssError::RootExtraction),
    }
}

/// All elements of `document` matching `selector`, in document order.
pub fn select_elements<'a>(document: &'a Html, selector: &Selector) -> Vec<ElementRef<'a>> {
    document.select(selector).collect()
}

fn extract_one(element: ElementRef<'_>, extract: &Extract) -> Option<String> {
    match extract {
        Extract::Text => Some(element.text().collect::<String>().trim().to_string()),
        Extract::Html => Some(element.html()),
        Extract::Attr(name) => element.value().attr(name).map(String::from),
    }
}

/// Extract values for `query` relative to `row`. Matches are searched among
/// the row's descendants; the row element itself never matches.
pub fn evaluate_css(query: &CssQuery, row: ElementRef<'_>) -> Vec<String> {
    match &query.selector {
        None => extract_one(row, &query.extract).into_iter().collect(),
        Some(selector) => row
            .select(selector)
            .filter(|el| el.id() != row.id())
            .filter_map(|el| extract_one(el, &query.extract))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
        <body>
            <ul id="products">
                <li class="product" data-sku="A1">
                    <span class="name"> Widget </span>
                    <span class="price">$19.99</span>
                    <a href="/p/a1">details</a>
                </li>
                <li class="product" data-sku="B2">
                    <span class="name">Gadget</span>
                    <a href="/p/b2">details</a>
                    <a href="/p/b2/reviews">reviews</a>
                </li>
            </ul>
        </body>
        </html>
    "#;

    fn rows(doc: &Html) -> Vec<ElementRef<'_>> {
        select_elements(doc, &parse_root_selector("li.product").unwrap())
    }

    #[test]
    fn selects_root_rows_in_document_order() {
        let doc = Html::parse_document(PAGE);
        let rows = rows(&doc);
        assert_eq!(rows.len(), 2);
        let none = select_elements(&doc, &parse_root_selector("table tr").unwrap());
        assert!(none.is_empty());
    }

    #[test]
    fn extracts_text_attr_and_html() {
        let doc = Html::parse_document(PAGE);
        let rows = rows(&doc);

        let name = parse_css(".name").unwrap();
        assert_eq!(evaluate_css(&name, rows[0]), vec!["Widget".to_string()]);

        let sku = parse_css("::attr(data-sku)").unwrap();
        assert_eq!(evaluate_css(&sku, rows[1]), vec!["B2".to_string()]);

        let links = parse_css("a::attr(href)").unwrap();
        assert_eq!(
            evaluate_css(&links, rows[1]),
            vec!["/p/b2".to_string(), "/p/b2/reviews".to_string()]
        );

        let price = parse_css(".price::html").unwrap();
        assert_eq!(
            evaluate_css(&price, rows[0]),
            vec![r#"<span class="price">$19.99</span>"#.to_string()]
        );
    }

    #[test]
    fn missing_matches_are_empty() {
        let doc = Html::parse_document(PAGE);
        let rows = rows(&doc);
        let price = parse_css(".price").unwrap();
        assert!(evaluate_css(&price, rows[1]).is_empty());
        let absent = parse_css("a::attr(title)").unwrap();
        assert!(evaluate_css(&absent, rows[0]).is_empty());
    }

    #[test]
    fn row_element_does_not_match_itself() {
        let doc = Html::parse_document(PAGE);
        let rows = rows(&doc);
        let product = parse_css("li.product").unwrap();
        assert!(evaluate_css(&product, rows[0]).is_empty());
    }

    #[test]
    fn rejects_bad_selectors_and_suffixes() {
        assert!(matches!(parse_css("div[["), Err(CssError::InvalidSelector { .. })));
        assert!(matches!(parse_css("a::href"), Err(CssError::UnknownExtraction(_))));
        assert!(matches!(parse_root_selector("li::text"), Err(CssError::RootExtraction)));
        assert!(matches!(parse_root_selector("  "), Err(CssError::EmptyRoot)));
        assert_eq!(parse_css("p").unwrap().extract(), &Extract::Text);
        assert!(matches!(parse_css("a::attr()"), Err(CssError::UnknownExtraction(_))));
    }

    #[test]
    fn double_colon_inside_selector_is_not_a_suffix() {
        let doc = Html::parse_document(r#"<p><a href="urn::x">one</a><a href="/two">two</a></p>"#);
        let p = select_elements(&doc, &parse_root_selector("p").unwrap());

        let plain = parse_css(r#"a[href*="::"]"#).unwrap();
        assert_eq!(plain.extract(), &Extract::Text);
        assert_eq!(evaluate_css(&plain, p[0]), vec!["one".to_string()]);

        let attr = parse_css(r#"a[href*="::"]::attr(href)"#).unwrap();
        assert_eq!(evaluate_css(&attr, p[0]), vec!["urn::x".to_string()]);

        let rows = select_elements(&doc, &parse_root_selector(r#"a[href*="::"]"#).unwrap());
        assert_eq!(rows.len(), 1);
    }
}
