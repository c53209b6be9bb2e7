//! TSpec CLI entry point

use clap::Parser;
use tspec_cli::cli::{Cli, Commands};
use tspec_cli::{commands, output};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so JSON/YAML on stdout stays machine-readable
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if let Commands::Functions = cli.command {
        return commands::info::functions(cli.format);
    }

    let engine = commands::load_engine(&cli.config)?;
    match &cli.command {
        Commands::List(args) => commands::specs::list(&engine, args, cli.format),
        Commands::Validate(args) => commands::specs::validate(&engine, args, cli.format),
        Commands::Parse { inputs, vars } => commands::specs::parse(&engine, inputs, vars, cli.format),
        Commands::Run(args) => commands::run::execute(&engine, args, cli.format).await,
        Commands::Protocols => commands::info::protocols(&engine, cli.format).await,
        Commands::Functions => commands::info::functions(cli.format),
    }
}
