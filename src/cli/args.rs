//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Research personalities across LLM providers with fallback and caching.
#[derive(Parser, Debug)]
#[command(name = "persona")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Config file (overrides PERSONA_CONFIG)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (human, json, compact)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub const fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Research a personality from a free-text description
    Research(ResearchArgs),

    /// Show configured providers, availability and health
    Providers(ProvidersArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

/// Arguments for the `research` command.
#[derive(Args, Debug)]
pub struct ResearchArgs {
    /// Who or what to research (e.g. "a grumpy medieval wizard")
    #[arg(value_name = "DESCRIPTION")]
    pub description: String,

    /// Try this provider first
    #[arg(long, short = 'p', value_name = "PROVIDER")]
    pub provider: Option<String>,
}

/// Arguments for the `providers` command.
#[derive(Args, Debug)]
pub struct ProvidersArgs {
    /// Validate each available provider's connection
    #[arg(long)]
    pub check: bool,
}

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Only print the config file path
    #[arg(long)]
    pub path: bool,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Human,
    /// JSON
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_research_with_provider() {
        let cli = Cli::parse_from(["persona", "research", "a grumpy wizard", "--provider", "anthropic"]);
        let Commands::Research(args) = cli.command else {
            panic!("expected research");
        };
        assert_eq!(args.description, "a grumpy wizard");
        assert_eq!(args.provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn json_flag_overrides_format() {
        let cli = Cli::parse_from(["persona", "providers", "--json"]);
        assert_eq!(cli.effective_format(), OutputFormat::Json);

        let cli = Cli::parse_from(["persona", "config"]);
        assert_eq!(cli.effective_format(), OutputFormat::Human);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["persona", "providers", "--check", "--log-level", "debug", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Providers(ProvidersArgs { check: true })));
    }

    #[test]
    fn research_requires_description() {
        assert!(Cli::try_parse_from(["persona", "research"]).is_err());
    }
}
