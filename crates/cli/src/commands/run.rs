//! run

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tspec_core::engine::{ParseOptions, RunOptions};
use tspec_core::report::{self, ReportFormat};
use tspec_core::types::{OutputConfig, TestResult};
use tspec_core::{Engine, RunOutcome};

use crate::cli::RunArgs;
use crate::output::{self, OutputFormat, TableDisplay};

impl TableDisplay for TestResult {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "PROTOCOL", "STATUS", "ASSERTIONS", "DURATION", "DETAIL"]
    }

    fn row(&self) -> Vec<String> {
        let detail = self.error.clone().unwrap_or_else(|| {
            self.assertions
                .iter()
                .filter(|a| !a.passed)
                .map(|a| a.message.clone())
                .collect::<Vec<_>>()
                .join("\n")
        });
        vec![
            self.id.clone(),
            self.protocol.clone().unwrap_or_else(|| "-".to_string()),
            output::status_label(self.passed),
            format!("{}/{}", self.summary.passed, self.summary.total),
            format!("{}ms", self.duration_ms),
            detail,
        ]
    }
}

pub fn run_options(args: &RunArgs) -> RunOptions {
    RunOptions {
        parse: ParseOptions {
            params: args.vars.param_map(),
            env: args.vars.env_map(),
        },
        concurrency: args.concurrency,
        concurrency_per_type: args.concurrency_per_type,
        timeout: args.timeout.map(Duration::from_millis),
        transport: None,
    }
}

/// Report destination: `--output` wins over the configured default
fn report_target(engine: &Engine, args: &RunArgs) -> Result<Option<OutputConfig>> {
    if let Some(name) = args.report_format.as_deref() {
        ReportFormat::from_str(name).context("invalid --report-format")?;
    }
    Ok(match &args.output {
        Some(path) => Some(OutputConfig {
            path: Some(path.clone()),
            format: args.report_format.clone(),
        }),
        None if engine.config().output.path.is_some() => Some(engine.config().output.clone()),
        None => None,
    })
}

pub async fn execute(engine: &Engine, args: &RunArgs, format: OutputFormat) -> Result<i32> {
    let target = report_target(engine, args)?;
    let files = engine.list_files(&args.inputs.paths);
    info!("Running {} file(s)", files.len());

    let outcome = engine.run_files(&files, &run_options(args)).await;

    if let Some(target) = target {
        if let Some(path) = report::write(&outcome.result, &target)? {
            info!("Report written to {}", path.display());
        }
    }

    print_outcome(&outcome, format)?;
    Ok(outcome.exit_code())
}

fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => output::print_document(outcome, format),
        OutputFormat::Plain => print!("{}", report::render(&outcome.result, ReportFormat::Text)?),
        OutputFormat::Table => {
            output::print_list(&outcome.result.results, format);
            output::print_summary(&outcome.result.summary, outcome.result.duration_ms);
        }
    }
    for error in &outcome.errors {
        output::print_error(&format!("{}: {}", error.file.display(), error.error));
    }
    for path in &outcome.reports {
        output::print_info(&format!("Report written to {}", path.display()));
    }
    Ok(())
}
