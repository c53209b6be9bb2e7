//! Template inheritance
//!
//! A spec that declares `extends: <path>` is layered on top of its parent.
//! The parent chain is loaded recursively and merged bottom-up with
//! [`deep_merge`]; a chain that revisits a file fails with
//! [`Error::CircularTemplate`].
//!
//! Merge rules, per node kind:
//!
//! | child value          | result                                         |
//! |----------------------|------------------------------------------------|
//! | absent               | parent value untouched                         |
//! | scalar / null        | child overwrites                               |
//! | array                | parent elements, then child elements           |
//! | object, parent object| recursive merge                                |
//! | object, otherwise    | child replaces                                 |
//! | `{$replace: true}`   | child replaces (use `$value` to replace arrays) |
//!
//! Keys starting with `$` are directives and never reach the output.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::spec::RawSpec;

/// Prefix marking control directives
pub const DIRECTIVE_PREFIX: char = '$';

/// Directive requesting full replacement of the parent value
pub const REPLACE_DIRECTIVE: &str = "$replace";

/// Replacement payload for values that cannot carry keys (arrays, scalars)
pub const VALUE_DIRECTIVE: &str = "$value";

/// Resolve `extends` against `base_dir`, returning the merged spec.
/// Specs without `extends` come back unchanged.
pub fn resolve(spec: RawSpec, base_dir: &Path) -> Result<RawSpec> {
    let mut visited = HashSet::new();
    if let Some(path) = spec.path() {
        visited.insert(normalize(path));
    }
    resolve_chain(spec, base_dir, &mut visited)
}

fn resolve_chain(spec: RawSpec, base_dir: &Path, visited: &mut HashSet<PathBuf>) -> Result<RawSpec> {
    let Some(extends) = spec.extends().map(str::to_string) else {
        return Ok(spec);
    };

    let parent_path = resolve_path(base_dir, &extends);
    let key = normalize(&parent_path);
    if !visited.insert(key.clone()) {
        return Err(Error::CircularTemplate { path: key });
    }

    debug!("Resolving template {} (extended from {})", parent_path.display(), extends);
    let parent = RawSpec::from_file(&parent_path)?;
    let parent_dir = parent.base_dir();
    let parent = resolve_chain(parent, &parent_dir, visited)?;

    let mut merged = RawSpec::from_value(deep_merge(&parent.to_value(), &spec.to_value()))?;
    merged.remove("extends");
    Ok(match spec.path() {
        Some(path) => merged.with_path(path),
        None => merged,
    })
}

/// Join a reference onto `base_dir`; absolute references pass through
pub fn resolve_path(base_dir: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Canonical path when the file exists, lexical normalisation otherwise
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Merge `child` over `parent`
pub fn deep_merge(parent: &Value, child: &Value) -> Value {
    match (parent, child) {
        (Value::Object(p), Value::Object(c)) if !wants_replace(c) => {
            let mut out = Map::new();
            for (key, value) in p {
                if !is_directive(key) {
                    out.insert(key.clone(), strip_directives(value));
                }
            }
            for (key, child_value) in c {
                if is_directive(key) {
                    continue;
                }
                let merged = match out.get(key) {
                    Some(parent_value) => merge_value(parent_value, child_value),
                    None => merge_value(&Value::Null, child_value),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        _ => merge_value(parent, child),
    }
}

fn merge_value(parent: &Value, child: &Value) -> Value {
    match child {
        Value::Object(c) if wants_replace(c) => match c.get(VALUE_DIRECTIVE) {
            Some(value) => strip_directives(value),
            None => strip_directives(child),
        },
        Value::Object(_) => match parent {
            Value::Object(_) => deep_merge(parent, child),
            _ => strip_directives(child),
        },
        Value::Array(items) => match parent {
            Value::Array(base) => Value::Array(
                base.iter()
                    .chain(items.iter())
                    .map(strip_directives)
                    .collect(),
            ),
            _ => strip_directives(child),
        },
        scalar => scalar.clone(),
    }
}

fn wants_replace(map: &Map<String, Value>) -> bool {
    matches!(map.get(REPLACE_DIRECTIVE), Some(Value::Bool(true)))
}

fn is_directive(key: &str) -> bool {
    key.starts_with(DIRECTIVE_PREFIX)
}

/// Remove directive keys at every depth. A `$replace` block with a
/// `$value` collapses to that value.
pub fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) if wants_replace(map) && map.contains_key(VALUE_DIRECTIVE) => {
            map.get(VALUE_DIRECTIVE).map(strip_directives).unwrap_or(Value::Null)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !is_directive(k))
                .map(|(k, v)| (k.clone(), strip_directives(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_directives).collect()),
        other => other.clone(),
    }
}
