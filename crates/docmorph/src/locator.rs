use std::collections::HashMap;

use crate::error::YamlLocation;

/// Maps spec paths (`mappings[1].expr`, `output.options.delimiter`) to the
/// line and column of the key in the YAML source.
///
/// Built from an indentation scan of block-style YAML. Flow-style values
/// (`{ name: a, expr: b }`) are located at the enclosing key or list item.
#[derive(Debug, Default)]
pub struct YamlLocator {
    locations: HashMap<String, YamlLocation>,
}

struct Frame {
    indent: usize,
    path: String,
    is_item: bool,
}

impl YamlLocator {
    pub fn from_str(source: &str) -> Self {
        let mut locations = HashMap::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut counters: HashMap<String, usize> = HashMap::new();
        let mut block_scalar: Option<usize> = None;

        for (line_index, raw) in source.lines().enumerate() {
            let line_no = line_index + 1;
            let mut indent = raw.len() - raw.trim_start_matches(' ').len();
            let mut rest = raw[indent..].trim_end();

            if let Some(owner) = block_scalar {
                if rest.is_empty() || indent > owner {
                    continue;
                }
                block_scalar = None;
            }
            if rest.is_empty() || rest.starts_with('#') || rest == "---" {
                continue;
            }

            while rest == "-" || rest.starts_with("- ") {
                while stack
                    .last()
                    .is_some_and(|f| f.indent > indent || (f.indent == indent && f.is_item))
                {
                    stack.pop();
                }
                let parent = stack.last().map(|f| f.path.clone()).unwrap_or_default();
                let counter = counters.entry(parent.clone()).or_insert(0);
                let path = format!("{}[{}]", parent, counter);
                *counter += 1;
                locations.entry(path.clone()).or_insert(YamlLocation {
                    line: line_no,
                    column: indent + 1,
                });
                stack.push(Frame {
                    indent,
                    path,
                    is_item: true,
                });

                let after_dash = &rest[1..];
                let content = after_dash.trim_start();
                indent += 1 + (after_dash.len() - content.len());
                rest = content;
            }

            let Some((key, value)) = split_key(rest) else {
                continue;
            };
            while stack
                .last()
                .is_some_and(|f| f.indent >= indent && !(f.is_item && f.indent < indent))
            {
                stack.pop();
            }
            let path = match stack.last() {
                Some(parent) if !parent.path.is_empty() => format!("{}.{}", parent.path, key),
                _ => key.to_string(),
            };
            locations.entry(path.clone()).or_insert(YamlLocation {
                line: line_no,
                column: indent + 1,
            });
            if value.starts_with('|') || value.starts_with('>') {
                block_scalar = Some(indent);
            }
            stack.push(Frame {
                indent,
                path,
                is_item: false,
            });
        }

        Self { locations }
    }

    /// Location of `path`, or of its nearest located ancestor.
    pub fn location_for(&self, path: &str) -> Option<YamlLocation> {
        let mut current = path;
        loop {
            if let Some(location) = self.locations.get(current) {
                return Some(location.clone());
            }
            let cut = current.rfind(['.', '['])?;
            current = &current[..cut];
            if current.is_empty() {
                return None;
            }
        }
    }
}

/// Split `key: value`, honouring a quoted key.
fn split_key(text: &str) -> Option<(&str, &str)> {
    if text.starts_with('{') || text.starts_with('[') {
        return None;
    }
    let (key, after) = match text.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let end = text[1..].find(quote)? + 1;
            (&text[1..end], &text[end + 1..])
        }
        _ => {
            let colon = text
                .match_indices(':')
                .map(|(i, _)| i)
                .find(|&i| matches!(text[i + 1..].chars().next(), None | Some(' ')))?;
            (text[..colon].trim_end(), &text[colon..])
        }
    };
    let value = after.strip_prefix(':')?;
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"version: 1
name: demo
input:
  type: json
  root: "$.items[*]"
output:
  type: csv
  options:
    delimiter: ";;"
mappings:
  - name: id
    expr: id
  - name: label
    expr: |
      name: not a key
  -   name: third
      expr: x
filters:
- expr: "a == 1"
- { expr: "b" }
"#;

    fn at(locator: &YamlLocator, path: &str) -> (usize, usize) {
        let loc = locator.location_for(path).unwrap();
        (loc.line, loc.column)
    }

    #[test]
    fn locates_nested_keys_and_list_items() {
        let locator = YamlLocator::from_str(SOURCE);
        assert_eq!(at(&locator, "version"), (1, 1));
        assert_eq!(at(&locator, "input.root"), (5, 3));
        assert_eq!(at(&locator, "output.options.delimiter"), (9, 5));
        assert_eq!(at(&locator, "mappings[0]"), (11, 3));
        assert_eq!(at(&locator, "mappings[0].name"), (11, 5));
        assert_eq!(at(&locator, "mappings[1].expr"), (14, 5));
        assert_eq!(at(&locator, "mappings[2].expr"), (17, 7));
        assert_eq!(at(&locator, "filters[0].expr"), (19, 3));
    }

    #[test]
    fn falls_back_to_enclosing_element() {
        let locator = YamlLocator::from_str(SOURCE);
        assert_eq!(at(&locator, "filters[1].expr"), (20, 1));
        assert_eq!(at(&locator, "output.options.header"), (8, 3));
        assert!(locator.location_for("parameters[0]").is_none());
    }

    #[test]
    fn block_scalars_do_not_create_keys() {
        let locator = YamlLocator::from_str(SOURCE);
        assert_eq!(at(&locator, "mappings[1].expr.name"), (14, 5));
    }
}
