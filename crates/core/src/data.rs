//! Data-driven case generation
//!
//! A spec with a `data` section expands into one spec per row of an external
//! source (delimited rows, JSON or YAML array of objects). Each generated
//! spec carries `_dataRowIndex`/`_dataRow` and is substituted with the row's
//! fields layered over its own variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::spec::{RawSpec, DATA_ROW_INDEX_KEY, DATA_ROW_KEY};
use crate::template::resolve_path;
use crate::variables::{self, VariableContext};

/// Supported data source formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Csv,
    Json,
    Yaml,
}

impl DataFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" => Some(DataFormat::Csv),
            "json" => Some(DataFormat::Json),
            "yaml" | "yml" => Some(DataFormat::Yaml),
            _ => None,
        }
    }
}

/// The `data` section of a spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub source: String,
    #[serde(default)]
    pub format: Option<DataFormat>,
    /// Only the default `file` driver is supported
    #[serde(default)]
    pub driver: Option<String>,
    /// Field delimiter for delimited sources; `\t` for `.tsv`, `,` otherwise
    #[serde(default)]
    pub delimiter: Option<char>,
}

impl DataConfig {
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::data_source("<data>", format!("invalid data section: {}", e)))
    }
}

/// Load every row of a data source; any bad row fails the whole file
pub fn load_rows(config: &DataConfig, base_dir: &Path) -> Result<Vec<Map<String, Value>>> {
    if let Some(driver) = config.driver.as_deref() {
        if driver != "file" {
            return Err(Error::data_source(
                &config.source,
                format!("unsupported data driver '{}'", driver),
            ));
        }
    }

    let path = resolve_path(base_dir, &config.source);
    let format = config
        .format
        .or_else(|| DataFormat::from_path(&path))
        .ok_or_else(|| Error::data_source(&path, "cannot detect data format from extension"))?;
    let content = std::fs::read_to_string(&path).map_err(|e| Error::data_source(&path, e))?;

    let rows = match format {
        DataFormat::Csv => {
            let delimiter = config.delimiter.unwrap_or_else(|| {
                if path.extension().is_some_and(|e| e == "tsv") {
                    '\t'
                } else {
                    ','
                }
            });
            parse_delimited(&content, delimiter).map_err(|e| Error::data_source(&path, e))?
        }
        DataFormat::Json => {
            let value: Value = serde_json::from_str(&content).map_err(|e| Error::data_source(&path, e))?;
            rows_from_value(value).map_err(|e| Error::data_source(&path, e))?
        }
        DataFormat::Yaml => {
            let value: Value = serde_yaml::from_str(&content).map_err(|e| Error::data_source(&path, e))?;
            rows_from_value(value).map_err(|e| Error::data_source(&path, e))?
        }
    };

    debug!("Loaded {} data row(s) from {}", rows.len(), path.display());
    Ok(rows)
}

fn rows_from_value(value: Value) -> std::result::Result<Vec<Map<String, Value>>, String> {
    let Value::Array(items) = value else {
        return Err("expected an array of objects".to_string());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(format!(
                "row {} is a {}, expected an object",
                i,
                crate::spec::type_name(&other)
            )),
        })
        .collect()
}

/// Parse delimited text with a header row. Fields may be double-quoted, with
/// `""` as an escaped quote. Rows whose width differs from the header fail.
pub fn parse_delimited(content: &str, delimiter: char) -> std::result::Result<Vec<Map<String, Value>>, String> {
    let records = split_records(content, delimiter)?;
    let mut records = records.into_iter().filter(|r| !(r.len() == 1 && r[0].is_empty()));

    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };
    if header.iter().any(|h| h.trim().is_empty()) {
        return Err("header row contains an empty column name".to_string());
    }

    let mut rows = Vec::new();
    for (i, record) in records.enumerate() {
        if record.len() != header.len() {
            return Err(format!(
                "row {} has {} field(s), header has {}",
                i + 1,
                record.len(),
                header.len()
            ));
        }
        let row = header
            .iter()
            .zip(record)
            .map(|(k, v)| (k.trim().to_string(), Value::String(v)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn split_records(content: &str, delimiter: char) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            other => field.push(other),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Expand `spec` into one substituted spec per data row. Without a `data`
/// section the result is the spec itself, substituted.
pub fn generate(spec: &RawSpec, base_dir: &Path, ctx: &VariableContext) -> Result<Vec<RawSpec>> {
    let Some(data) = spec.get("data") else {
        return Ok(vec![substitute_spec(spec, ctx)]);
    };

    let config = DataConfig::from_value(data)?;
    let rows = load_rows(&config, base_dir)?;
    info!(
        "Generating {} case(s) from {}",
        rows.len(),
        data_source_label(spec, &config)
    );

    let mut generated = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let mut row_ctx = ctx.clone();
        row_ctx.extend_environment(&row);

        let mut expanded = spec.clone();
        expanded.remove("data");
        let mut expanded = substitute_spec(&expanded, &row_ctx);
        expanded.insert(DATA_ROW_INDEX_KEY, Value::from(index));
        expanded.insert(DATA_ROW_KEY, Value::Object(row));
        generated.push(expanded);
    }
    Ok(generated)
}

fn substitute_spec(spec: &RawSpec, ctx: &VariableContext) -> RawSpec {
    let Value::Object(doc) = variables::substitute(&spec.to_value(), ctx) else {
        return spec.clone();
    };
    let out = RawSpec::from_map(doc);
    match spec.path() {
        Some(path) => out.with_path(path),
        None => out,
    }
}

fn data_source_label(spec: &RawSpec, config: &DataConfig) -> String {
    let source = PathBuf::from(&config.source);
    match spec.path() {
        Some(path) => format!("{} (for {})", source.display(), path.display()),
        None => source.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_parse_delimited_with_quotes() {
        let rows = parse_delimited("name,note\nalice,\"hello, world\"\nbob,\"say \"\"hi\"\"\"\n", ',').unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["note"], json!("hello, world"));
        assert_eq!(rows[1]["note"], json!("say \"hi\""));
    }

    #[test]
    fn test_parse_delimited_rejects_ragged_rows() {
        let err = parse_delimited("a,b\n1,2\n3\n", ',').unwrap_err();
        assert!(err.contains("row 2"));
        assert!(parse_delimited("a\n\"open\n", ',').is_err());
    }

    #[test]
    fn test_generate_without_data_substitutes_once() {
        let spec = RawSpec::from_yaml("http:\n  path: /users/${id}\n").unwrap();
        let ctx = VariableContext::new().with_params(json!({ "id": 3 }).as_object().cloned().unwrap());
        let out = generate(&spec, Path::new("."), &ctx).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("http").unwrap()["path"], json!("/users/3"));
    }

    #[test]
    fn test_generate_three_rows_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users.csv"), "name,age\nalice,30\nbob,25\ncarol,41\n").unwrap();
        let spec = RawSpec::from_yaml(
            "data:\n  source: users.csv\nhttp:\n  method: POST\n  body:\n    name: ${name}\n    age: ${age}\n",
        )
        .unwrap();

        let out = generate(&spec, dir.path(), &VariableContext::new()).unwrap();
        assert_eq!(out.len(), 3);
        for (i, (generated, name)) in out.iter().zip(["alice", "bob", "carol"]).enumerate() {
            assert_eq!(generated.get(DATA_ROW_INDEX_KEY), Some(&json!(i)));
            assert_eq!(generated.get(DATA_ROW_KEY).unwrap()["name"], json!(name));
            assert_eq!(generated.get("http").unwrap()["body"]["name"], json!(name));
            assert!(generated.get("data").is_none());
        }
        assert_eq!(out[1].get("http").unwrap()["body"]["age"], json!("25"));
    }

    #[test]
    fn test_generate_from_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rows.json"), r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        fs::write(dir.path().join("rows.yml"), "- id: 10\n- id: 20\n- id: 30\n").unwrap();

        let json_spec = RawSpec::from_yaml("data:\n  source: rows.json\nhttp:\n  path: /x/${id}\n").unwrap();
        let yaml_spec = RawSpec::from_yaml("data:\n  source: rows.yml\nhttp:\n  path: /x/${id}\n").unwrap();

        let from_json = generate(&json_spec, dir.path(), &VariableContext::new()).unwrap();
        let from_yaml = generate(&yaml_spec, dir.path(), &VariableContext::new()).unwrap();
        assert_eq!(from_json.len(), 2);
        assert_eq!(from_yaml.len(), 3);
        assert_eq!(from_yaml[2].get("http").unwrap()["path"], json!("/x/30"));
        assert_eq!(from_json[0].get(DATA_ROW_KEY), Some(&json!({ "id": 1 })));
    }

    #[test]
    fn test_explicit_params_win_over_row_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rows.json"), r#"[{"env": "row"}]"#).unwrap();
        let spec = RawSpec::from_yaml("data:\n  source: rows.json\nhttp:\n  path: /${env}\n").unwrap();
        let ctx = VariableContext::new().with_params(json!({ "env": "param" }).as_object().cloned().unwrap());

        let out = generate(&spec, dir.path(), &ctx).unwrap();
        assert_eq!(out[0].get("http").unwrap()["path"], json!("/param"));
    }

    #[test]
    fn test_malformed_rows_fail_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rows.json"), r#"[{"id": 1}, 2]"#).unwrap();
        let spec = RawSpec::from_yaml("data:\n  source: rows.json\nhttp: {}\n").unwrap();
        let err = generate(&spec, dir.path(), &VariableContext::new()).unwrap_err();
        assert!(matches!(err, Error::DataSource { .. }));
    }

    #[test]
    fn test_unknown_extension_and_driver() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rows.txt"), "a\n1\n").unwrap();
        let unknown_ext = DataConfig { source: "rows.txt".into(), format: None, driver: None, delimiter: None };
        assert!(load_rows(&unknown_ext, dir.path()).is_err());

        let explicit = DataConfig { format: Some(DataFormat::Csv), ..unknown_ext.clone() };
        assert_eq!(load_rows(&explicit, dir.path()).unwrap().len(), 1);

        let bad_driver = DataConfig { driver: Some("sql".into()), ..explicit };
        assert!(load_rows(&bad_driver, dir.path()).is_err());
    }
}
