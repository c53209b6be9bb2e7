//! list, validate and parse

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tspec_core::engine::ParseOptions;
use tspec_core::validate::ValidationResult;
use tspec_core::{Engine, TestCase};

use crate::cli::{InputArgs, VarArgs};
use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Serialize)]
struct SpecFile {
    file: PathBuf,
    protocol: Option<String>,
}

impl TableDisplay for SpecFile {
    fn headers() -> Vec<&'static str> {
        vec!["FILE", "PROTOCOL"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.file.display().to_string(),
            self.protocol.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

impl TableDisplay for ValidationResult {
    fn headers() -> Vec<&'static str> {
        vec!["FILE", "STATUS", "ERRORS"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.file.display().to_string(),
            output::status_label(self.valid),
            self.errors.join("\n"),
        ]
    }
}

impl TableDisplay for TestCase {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "PROTOCOL", "DESCRIPTION", "ASSERTIONS"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.protocol_name().to_string(),
            self.description.clone(),
            self.assertions.len().to_string(),
        ]
    }
}

/// Print the spec and suite files found under the inputs
pub fn list(engine: &Engine, args: &InputArgs, format: OutputFormat) -> Result<i32> {
    let files: Vec<SpecFile> = engine
        .list_files(&args.paths)
        .into_iter()
        .map(|file| SpecFile {
            protocol: engine.registry().protocol_from_path(&file),
            file,
        })
        .collect();
    output::print_list(&files, format);
    Ok(0)
}

pub fn validate(engine: &Engine, args: &InputArgs, format: OutputFormat) -> Result<i32> {
    let files = engine.list_files(&args.paths);
    let results = engine.validate_files(&files);
    output::print_list(&results, format);

    let invalid = results.iter().filter(|r| !r.valid).count();
    if matches!(format, OutputFormat::Table) {
        if invalid == 0 {
            output::print_success(&format!("{} file(s) valid", results.len()));
        } else {
            output::print_error(&format!("{} of {} file(s) invalid", invalid, results.len()));
        }
    }
    Ok(if invalid == 0 { 0 } else { 1 })
}

/// Resolve files into test cases without executing them
pub fn parse(engine: &Engine, args: &InputArgs, vars: &VarArgs, format: OutputFormat) -> Result<i32> {
    let files = engine.list_files(&args.paths);
    let options = ParseOptions {
        params: vars.param_map(),
        env: vars.env_map(),
    };
    let outcome = engine.parse_files(&files, &options);

    match format {
        OutputFormat::Json | OutputFormat::Yaml => output::print_document(&outcome.cases, format),
        _ => output::print_list(&outcome.cases, format),
    }
    for error in &outcome.errors {
        output::print_error(&format!("{}: {}", error.file.display(), error.error));
    }
    Ok(if outcome.errors.is_empty() { 0 } else { 2 })
}
