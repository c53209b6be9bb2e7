//! Result reports

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::types::{OutputConfig, ScheduleResult};

/// Report serialisation format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
    Text,
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "yaml" | "yml" => Ok(ReportFormat::Yaml),
            "text" | "txt" => Ok(ReportFormat::Text),
            other => Err(Error::Config(format!("unknown report format '{}'", other))),
        }
    }
}

impl ReportFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(|e| e.parse().ok())
    }
}

/// Render a batch result
pub fn render(result: &ScheduleResult, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        ReportFormat::Yaml => Ok(serde_yaml::to_string(result)?),
        ReportFormat::Text => Ok(render_text(result)),
    }
}

fn render_text(result: &ScheduleResult) -> String {
    let mut out = String::new();
    for r in &result.results {
        let mark = if r.passed { "PASS" } else { "FAIL" };
        let _ = writeln!(out, "{} {} [{}] ({}ms)", mark, r.id, r.protocol.as_deref().unwrap_or("unknown"), r.duration_ms);
        for a in r.assertions.iter().filter(|a| !a.passed) {
            let _ = writeln!(out, "    - {}", a.message);
        }
        if let Some(error) = &r.error {
            let _ = writeln!(out, "    error: {}", error);
        }
    }
    let s = &result.summary;
    let _ = writeln!(
        out,
        "\n{} total, {} passed, {} failed ({:.1}%) in {}ms",
        s.total,
        s.passed,
        s.failed,
        s.pass_rate * 100.0,
        result.duration_ms
    );
    out
}

/// Write a report to `output.path`. The format comes from `output.format`,
/// then the file extension, then JSON.
pub fn write(result: &ScheduleResult, output: &OutputConfig) -> Result<Option<PathBuf>> {
    let Some(path) = output.path.as_ref() else {
        return Ok(None);
    };
    let format = match output.format.as_deref() {
        Some(name) => name.parse()?,
        None => ReportFormat::from_path(path).unwrap_or_default(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(result, format)?)?;
    info!("Results written to: {}", path.display());
    Ok(Some(path.clone()))
}
