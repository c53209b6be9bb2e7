//! Path expressions over structured values
//!
//! Two spellings share one grammar:
//!
//! - query form, rooted at `$`: `$.data.items[0].id`, `$.items[*].id`,
//!   `$..id`, `$['content-type']`
//! - literal dot/bracket form: `body.items[0].id`, `headers.content-type`
//!
//! Expressions with a wildcard or recursive descent select every match and
//! yield an array; all others select at most one value.

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    source: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    pub fn parse(expression: &str) -> Result<Self> {
        let source = expression.trim();
        if source.is_empty() {
            return Err(Error::expression(expression, "empty path"));
        }
        let rest = source.strip_prefix('$').unwrap_or(source);
        let segments = parse_segments(source, rest, !source.starts_with('$'))?;
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// True when the expression can match more than one value
    pub fn is_multi(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Wildcard | Segment::Descendant(_)))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every value the expression selects, in document order
    pub fn query<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                apply(segment, value, &mut next);
            }
            current = next;
        }
        current
    }

    /// Single-match expressions yield the match; multi-match expressions
    /// yield an array of all matches
    pub fn select(&self, root: &Value) -> Option<Value> {
        let matches = self.query(root);
        if self.is_multi() {
            Some(Value::Array(matches.into_iter().cloned().collect()))
        } else {
            matches.into_iter().next().cloned()
        }
    }
}

/// Parse and evaluate in one step
pub fn select(root: &Value, expression: &str) -> Result<Option<Value>> {
    Ok(PathExpr::parse(expression)?.select(root))
}

fn apply<'a>(segment: &Segment, value: &'a Value, out: &mut Vec<&'a Value>) {
    match segment {
        Segment::Child(name) => {
            if let Some(child) = value.as_object().and_then(|m| m.get(name)) {
                out.push(child);
            } else if let (Value::Array(items), Ok(idx)) = (value, name.parse::<usize>()) {
                if let Some(item) = items.get(idx) {
                    out.push(item);
                }
            }
        }
        Segment::Index(idx) => {
            if let Value::Array(items) = value {
                let resolved = if *idx < 0 {
                    items.len().checked_sub(idx.unsigned_abs() as usize)
                } else {
                    Some(*idx as usize)
                };
                if let Some(item) = resolved.and_then(|i| items.get(i)) {
                    out.push(item);
                }
            }
        }
        Segment::Wildcard => match value {
            Value::Array(items) => out.extend(items.iter()),
            Value::Object(map) => out.extend(map.values()),
            _ => {}
        },
        Segment::Descendant(name) => collect_descendants(name, value, out),
    }
}

fn collect_descendants<'a>(name: &str, value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if name == "*" {
                out.extend(map.values());
            } else if let Some(found) = map.get(name) {
                out.push(found);
            }
            for child in map.values() {
                collect_descendants(name, child, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                if name == "*" {
                    out.push(child);
                }
                collect_descendants(name, child, out);
            }
        }
        _ => {}
    }
}

fn parse_segments(source: &str, input: &str, bare_start: bool) -> Result<Vec<Segment>> {
    let chars: Vec<char> = input.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    if bare_start && chars.first().is_some_and(|c| *c != '[' && *c != '.') {
        let (name, next) = read_name(&chars, 0);
        segments.push(name_segment(name));
        i = next;
    }

    while i < chars.len() {
        match chars[i] {
            '.' if chars.get(i + 1) == Some(&'.') => {
                let (name, next) = read_name(&chars, i + 2);
                if name.is_empty() {
                    return Err(Error::expression(source, "expected a name after '..'"));
                }
                segments.push(Segment::Descendant(name));
                i = next;
            }
            '.' => {
                let (name, next) = read_name(&chars, i + 1);
                if name.is_empty() {
                    return Err(Error::expression(source, "expected a name after '.'"));
                }
                segments.push(name_segment(name));
                i = next;
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| Error::expression(source, "unterminated '['"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                segments.push(bracket_segment(source, inner.trim())?);
                i = close + 1;
            }
            other => {
                return Err(Error::expression(source, format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(segments)
}

fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn name_segment(name: String) -> Segment {
    if name == "*" {
        Segment::Wildcard
    } else {
        Segment::Child(name)
    }
}

fn bracket_segment(source: &str, inner: &str) -> Result<Segment> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Some(quoted) = strip_quotes(inner) {
        return Ok(Segment::Child(quoted.to_string()));
    }
    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| Error::expression(source, format!("invalid index '{}'", inner)))
}

fn strip_quotes(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "status": 200,
            "headers": { "content-type": "application/json" },
            "body": {
                "data": {
                    "items": [
                        { "id": 1, "name": "a" },
                        { "id": 2, "name": "b" }
                    ]
                }
            }
        })
    }

    #[test]
    fn test_query_form() {
        let root = doc();
        assert_eq!(select(&root, "$.status").unwrap(), Some(json!(200)));
        assert_eq!(select(&root, "$.body.data.items[1].name").unwrap(), Some(json!("b")));
        assert_eq!(select(&root, "$.body.data.items[-1].id").unwrap(), Some(json!(2)));
        assert_eq!(select(&root, "$['headers']['content-type']").unwrap(), Some(json!("application/json")));
    }

    #[test]
    fn test_literal_form() {
        let root = doc();
        assert_eq!(select(&root, "body.data.items[0].id").unwrap(), Some(json!(1)));
        assert_eq!(select(&root, "headers.content-type").unwrap(), Some(json!("application/json")));
        assert_eq!(select(&root, "body.data.items.1.id").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_multi_match_yields_array() {
        let root = doc();
        assert_eq!(select(&root, "$.body.data.items[*].id").unwrap(), Some(json!([1, 2])));
        assert_eq!(select(&root, "$..name").unwrap(), Some(json!(["a", "b"])));
        assert_eq!(select(&root, "$..missing").unwrap(), Some(json!([])));
    }

    #[test]
    fn test_missing_path_is_none() {
        let root = doc();
        assert_eq!(select(&root, "$.body.nope").unwrap(), None);
        assert_eq!(select(&root, "$.body.data.items[5]").unwrap(), None);
    }

    #[test]
    fn test_root_selects_everything() {
        let root = doc();
        assert_eq!(select(&root, "$").unwrap(), Some(root.clone()));
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(PathExpr::parse("$.items[0").is_err());
        assert!(PathExpr::parse("$.items[abc]").is_err());
        assert!(PathExpr::parse("$.").is_err());
        assert!(PathExpr::parse("  ").is_err());
    }
}
