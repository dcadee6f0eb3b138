//! A JSONPath subset for selecting one value out of a `Document`.
//!
//! ```text
//! expression := '{' path '}' | path
//! path       := ['$'] segment*
//! segment    := '.' name | '.*' | '..' name | '[' index ']' | '[*]'
//!             | "['" name "']" | '["' name '"]'
//! ```
//!
//! A leading bare name (`data.password`) is read as `.data.password`.
//! Field names are case-sensitive.

use thiserror::Error;

use crate::document::Document;

#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("invalid path expression {expr:?}: {reason}")]
    Syntax { expr: String, reason: String },

    #[error("field {0:?} not found")]
    MissingKey(String),

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("cannot apply {segment} to a {found}")]
    NotTraversable { segment: String, found: &'static str },

    #[error("path matched nothing")]
    NoResults,

    #[error("path matched {0} values, expected exactly one")]
    MultipleResults(usize),

    #[error("path resolved to null")]
    NullResult,

    #[error("path resolved to a {0}, expected a scalar or byte string")]
    UnsupportedResult(&'static str),

    #[error("cannot build document: {0}")]
    Document(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
}

impl Segment {
    fn describe(&self) -> String {
        match self {
            Segment::Child(name) => format!(".{name}"),
            Segment::Index(i) => format!("[{i}]"),
            Segment::Wildcard => "[*]".to_string(),
            Segment::Descendant(name) => format!("..{name}"),
        }
    }
}

/// The single value a path selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Text(String),
    Bytes(Vec<u8>),
}

impl Extracted {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Extracted::Text(s) => s.into_bytes(),
            Extracted::Bytes(b) => b,
        }
    }

    /// Text form; byte strings are read as (lossy) UTF-8.
    pub fn into_text(self) -> String {
        match self {
            Extracted::Text(s) => s,
            Extracted::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
        }
    }
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    source: String,
    segments: Vec<Segment>,
}

impl PathExpression {
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let syntax = |reason: &str| PathError::Syntax {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut body = expr.trim();
        if let Some(inner) = body.strip_prefix('{') {
            body = inner.strip_suffix('}').ok_or_else(|| syntax("unclosed '{'"))?.trim();
        } else if body.ends_with('}') {
            return Err(syntax("unopened '}'"));
        }
        if body.is_empty() {
            return Err(syntax("empty expression"));
        }

        let chars: Vec<char> = body.chars().collect();
        let mut pos = 0;
        let mut segments = Vec::new();

        if chars[0] == '$' {
            pos = 1;
        } else if chars[0] != '.' && chars[0] != '[' {
            let name = read_name(&chars, &mut pos);
            segments.push(Segment::Child(name));
        }

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    if chars.get(pos) == Some(&'.') {
                        pos += 1;
                        let name = read_name(&chars, &mut pos);
                        if name.is_empty() {
                            return Err(syntax("'..' must be followed by a field name"));
                        }
                        segments.push(Segment::Descendant(name));
                    } else if chars.get(pos) == Some(&'*') {
                        pos += 1;
                        segments.push(Segment::Wildcard);
                    } else {
                        let name = read_name(&chars, &mut pos);
                        if name.is_empty() {
                            return Err(syntax("'.' must be followed by a field name"));
                        }
                        segments.push(Segment::Child(name));
                    }
                }
                '[' => {
                    let close = closing_bracket(&chars, pos).ok_or_else(|| syntax("unclosed '['"))?;
                    let inner: String = chars[pos + 1..close].iter().collect();
                    let inner = inner.trim();
                    segments.push(parse_bracket(inner).ok_or_else(|| {
                        syntax(&format!("unsupported subscript [{inner}]"))
                    })?);
                    pos = close + 1;
                }
                c => return Err(syntax(&format!("unexpected character {c:?}"))),
            }
        }

        Ok(Self {
            source: expr.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every value the path selects, in document order.
    pub fn select<'a>(&self, root: &'a Document) -> Result<Vec<&'a Document>, PathError> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for node in current {
                match segment {
                    Segment::Child(name) => match node {
                        Document::Map(map) => {
                            next.push(map.get(name).ok_or_else(|| PathError::MissingKey(name.clone()))?)
                        }
                        other => {
                            return Err(PathError::NotTraversable {
                                segment: segment.describe(),
                                found: other.type_name(),
                            });
                        }
                    },
                    Segment::Index(index) => match node {
                        Document::List(items) => {
                            let len = items.len();
                            let resolved = if *index < 0 { len as i64 + index } else { *index };
                            let item = usize::try_from(resolved)
                                .ok()
                                .and_then(|i| items.get(i))
                                .ok_or(PathError::IndexOutOfRange { index: *index, len })?;
                            next.push(item);
                        }
                        other => {
                            return Err(PathError::NotTraversable {
                                segment: segment.describe(),
                                found: other.type_name(),
                            });
                        }
                    },
                    Segment::Wildcard => match node {
                        Document::Map(map) => next.extend(map.values()),
                        Document::List(items) => next.extend(items.iter()),
                        _ => {}
                    },
                    Segment::Descendant(name) => collect_descendants(node, name, &mut next),
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Evaluate to exactly one scalar or byte string.
    pub fn evaluate(&self, root: &Document) -> Result<Extracted, PathError> {
        let found = self.select(root)?;
        let value = match found.as_slice() {
            [] => return Err(PathError::NoResults),
            [one] => *one,
            many => return Err(PathError::MultipleResults(many.len())),
        };
        match value {
            Document::Null => Err(PathError::NullResult),
            Document::Bool(b) => Ok(Extracted::Text(b.to_string())),
            Document::Int(i) => Ok(Extracted::Text(i.to_string())),
            Document::Float(f) => Ok(Extracted::Text(f.to_string())),
            Document::String(s) => Ok(Extracted::Text(s.clone())),
            Document::Bytes(b) => Ok(Extracted::Bytes(b.clone())),
            other => Err(PathError::UnsupportedResult(other.type_name())),
        }
    }
}

/// A bare field name runs up to the next separator. Anything the main
/// loop does not expect after it is reported there.
fn read_name(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && !is_name_terminator(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn is_name_terminator(c: char) -> bool {
    matches!(c, '.' | '[' | ']' | '{' | '}') || c.is_whitespace()
}

/// Index of the `]` closing the subscript opened at `open`, skipping
/// brackets inside quoted names.
fn closing_bracket(chars: &[char], open: usize) -> Option<usize> {
    let mut quote = None;
    for (i, &c) in chars.iter().enumerate().skip(open + 1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ']' => return Some(i),
            None => {}
        }
    }
    None
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    if inner == "*" {
        return Some(Segment::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(name) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Some(Segment::Child(name.to_string()));
        }
    }
    inner.parse::<i64>().ok().map(Segment::Index)
}

fn collect_descendants<'a>(node: &'a Document, name: &str, out: &mut Vec<&'a Document>) {
    match node {
        Document::Map(map) => {
            if let Some(hit) = map.get(name) {
                out.push(hit);
            }
            for child in map.values() {
                collect_descendants(child, name, out);
            }
        }
        Document::List(items) => {
            for item in items {
                collect_descendants(item, name, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from(json!({
            "metadata": {"name": "db", "labels": {"app.kubernetes.io/name": "pg"}},
            "spec": {
                "clusterIP": "10.0.0.7",
                "ports": [
                    {"name": "pg", "port": 5432},
                    {"name": "metrics", "port": 9187}
                ],
                "ready": true,
                "ratio": 0.5,
                "nothing": null
            }
        }))
    }

    fn eval(expr: &str) -> Result<Extracted, PathError> {
        PathExpression::parse(expr)?.evaluate(&doc())
    }

    fn text(s: &str) -> Result<Extracted, PathError> {
        Ok(Extracted::Text(s.to_string()))
    }

    #[test]
    fn braces_and_root_are_optional() {
        assert_eq!(eval("{.spec.clusterIP}"), text("10.0.0.7"));
        assert_eq!(eval("$.spec.clusterIP"), text("10.0.0.7"));
        assert_eq!(eval("{$.spec.clusterIP}"), text("10.0.0.7"));
        assert_eq!(eval("spec.clusterIP"), text("10.0.0.7"));
    }

    #[test]
    fn scalars_render_as_text() {
        assert_eq!(eval("{.spec.ports[0].port}"), text("5432"));
        assert_eq!(eval("{.spec.ready}"), text("true"));
        assert_eq!(eval("{.spec.ratio}"), text("0.5"));
    }

    #[test]
    fn indices_and_quoted_names() {
        assert_eq!(eval("{.spec.ports[-1].name}"), text("metrics"));
        assert_eq!(eval("{.metadata.labels['app.kubernetes.io/name']}"), text("pg"));
        assert_eq!(eval(r#"{.metadata["name"]}"#), text("db"));
        assert_eq!(eval("{.spec.ports[ 1 ].name}"), text("metrics"));
        assert_eq!(
            eval("{.spec.ports[2].name}"),
            Err(PathError::IndexOutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn quoted_names_may_contain_brackets() {
        let root = Document::from(json!({"data": {"a]b": "x", "[c]": "y"}}));
        let get = |expr: &str| PathExpression::parse(expr)?.evaluate(&root);
        assert_eq!(get("{.data['a]b']}"), text("x"));
        assert_eq!(get(r#"{.data["[c]"]}"#), text("y"));
        assert!(matches!(
            PathExpression::parse("{.data['a]}"),
            Err(PathError::Syntax { .. })
        ));
    }

    #[test]
    fn field_names_are_case_sensitive() {
        assert_eq!(eval("{.spec.clusterip}"), Err(PathError::MissingKey("clusterip".to_string())));
    }

    #[test]
    fn result_cardinality_is_enforced() {
        assert_eq!(eval("{.spec.ports[*].port}"), Err(PathError::MultipleResults(2)));
        assert_eq!(eval("{..port}"), Err(PathError::MultipleResults(2)));
        assert_eq!(eval("{..clusterIP}"), text("10.0.0.7"));
        assert_eq!(eval("{..absent}"), Err(PathError::NoResults));
    }

    #[test]
    fn null_and_composite_results_are_rejected() {
        assert_eq!(eval("{.spec.nothing}"), Err(PathError::NullResult));
        assert_eq!(eval("{.spec.ports}"), Err(PathError::UnsupportedResult("list")));
        assert_eq!(eval("{.metadata}"), Err(PathError::UnsupportedResult("map")));
    }

    #[test]
    fn traversing_a_scalar_is_an_error() {
        assert!(matches!(
            eval("{.spec.clusterIP.x}"),
            Err(PathError::NotTraversable { found: "string", .. })
        ));
    }

    #[test]
    fn bytes_are_returned_as_bytes() {
        let root = Document::Map([("data".to_string(), Document::Bytes(vec![1, 2]))].into());
        let got = PathExpression::parse("{.data}").unwrap().evaluate(&root).unwrap();
        assert_eq!(got, Extracted::Bytes(vec![1, 2]));
    }

    #[test]
    fn syntax_errors() {
        for bad in [
            "",
            "{}",
            "{.spec",
            ".spec}",
            "{.spec}}",
            "{{.spec}",
            "{.spec .x}",
            "{.a b}",
            "{.spec]}",
            "{.spec[}",
            "{.spec[abc]}",
            "{.}",
            "{..}",
            "{.a b}x",
        ] {
            assert!(
                matches!(PathExpression::parse(bad), Err(PathError::Syntax { .. })),
                "{bad:?} should not parse"
            );
        }
    }
}
