//! Command-line definition

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

use crate::output::OutputFormat;

/// TSpec - declarative API test specifications
#[derive(Parser, Debug)]
#[command(name = "tspec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "TSPEC_CONFIG", default_value = "tspec.toml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List spec and suite files
    List(InputArgs),

    /// Validate spec files without running them
    Validate(InputArgs),

    /// Resolve spec files into test cases
    Parse {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        vars: VarArgs,
    },

    /// Run spec files
    Run(RunArgs),

    /// List supported protocols
    Protocols,

    /// List built-in template functions
    Functions,
}

/// Files or directories to operate on
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Spec files or directories (walked recursively)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Variable overrides
#[derive(Args, Debug, Clone, Default)]
pub struct VarArgs {
    /// Environment variable for substitution (KEY=VALUE)
    #[arg(short, long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, Value)>,

    /// Parameter with the highest precedence (KEY=VALUE)
    #[arg(short, long = "param", value_parser = parse_key_value)]
    pub param: Vec<(String, Value)>,
}

impl VarArgs {
    pub fn env_map(&self) -> Map<String, Value> {
        self.env.iter().cloned().collect()
    }

    pub fn param_map(&self) -> Map<String, Value> {
        self.param.iter().cloned().collect()
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    #[command(flatten)]
    pub vars: VarArgs,

    /// Global concurrency
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Concurrency per protocol
    #[arg(long)]
    pub concurrency_per_type: Option<usize>,

    /// Request timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Write the full report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report file format (json, yaml, text); defaults to the file extension
    #[arg(long)]
    pub report_format: Option<String>,
}

/// Parse `KEY=VALUE`. Values are read as YAML scalars so `3` and `true`
/// keep their types; anything else stays a string.
pub fn parse_key_value(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    let value = match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
        _ => Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(parse_key_value("debug=true").unwrap(), ("debug".to_string(), json!(true)));
        assert_eq!(
            parse_key_value("url=http://a/b?x=1").unwrap(),
            ("url".to_string(), json!("http://a/b?x=1"))
        );
        assert_eq!(parse_key_value("empty=").unwrap(), ("empty".to_string(), json!("")));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "tspec",
            "--format",
            "json",
            "run",
            "specs/",
            "--concurrency",
            "2",
            "-e",
            "host=api.test",
            "-p",
            "user=alice",
            "--output",
            "out.yaml",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.inputs.paths, vec![PathBuf::from("specs/")]);
        assert_eq!(args.concurrency, Some(2));
        assert_eq!(args.vars.env_map()["host"], json!("api.test"));
        assert_eq!(args.vars.param_map()["user"], json!("alice"));
        assert_eq!(args.output, Some(PathBuf::from("out.yaml")));
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn test_paths_are_required() {
        assert!(Cli::try_parse_from(["tspec", "validate"]).is_err());
        assert!(Cli::try_parse_from(["tspec", "protocols"]).is_ok());
    }
}
