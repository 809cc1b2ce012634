//! persona - personality research CLI
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::process::ExitCode;

use clap::Parser;

use persona_core::cli::{self, Cli, Commands};
use persona_core::core::logging::{self, LogFormat, LogLevel};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (level, format, file) = logging::resolve(
        cli.log_level.as_deref().and_then(LogLevel::from_arg),
        cli.log_format.as_deref().and_then(LogFormat::from_arg),
        cli.log_file.clone(),
        cli.verbose,
    );
    logging::init(level, format, file);

    match run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(code = e.error_code(), "{}", e);
            eprintln!("error: {}", e.to_report_line());
            for suggestion in e.fix_suggestions() {
                eprintln!("  - {}", suggestion.context);
                for command in &suggestion.commands {
                    eprintln!("      $ {command}");
                }
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> persona_core::Result<persona_core::ExitCode> {
    let format = cli.effective_format();
    let pretty = cli.pretty;
    let config = cli::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Research(args) => cli::research::execute(args, &config, format, pretty).await,
        Commands::Providers(args) => cli::providers::execute(args, &config, format, pretty).await,
        Commands::Config(args) => {
            cli::config::execute(args, &config, cli.config.clone(), format, pretty)
        }
    }
}
