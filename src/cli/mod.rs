use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::transcribe::Tier;

#[derive(Parser)]
#[command(
    name = "transcriptor",
    about = "Shortform Transcriptor - Get transcripts for TikTok-style short videos from whichever backend answers",
    version,
    long_about = "Acquires a transcript for a short-form video URL by trying the configured transcription providers in priority order. API providers are submitted and polled; sites without an API are driven through a headless browser. Retries, fallbacks and duplicate requests are handled for you."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to the config file
    #[arg(long, global = true, env = "TRANSCRIPTOR_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Acquire a transcript for a video URL
    Transcribe {
        /// Video URL, or shared text containing one
        #[arg(value_name = "URL")]
        url: String,

        /// Processing tier
        #[arg(short, long, value_enum, default_value = "quick")]
        tier: Tier,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show provider selection order and why providers are skipped
    Providers {
        /// Tier to evaluate selection for
        #[arg(short, long, value_enum, default_value = "quick")]
        tier: Tier,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain transcript text, or a readable failure message
    Text,
    /// Full result with per-provider attempts
    Json,
}

impl OutputFormat {
    /// File extension used for generated output names
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_transcribe() {
        let cli = Cli::parse_from([
            "transcriptor",
            "transcribe",
            "https://vm.tiktok.com/ABC123/",
            "--tier",
            "deep",
            "--format",
            "json",
            "--verbose",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Transcribe { url, tier, format, output } => {
                assert_eq!(url, "https://vm.tiktok.com/ABC123/");
                assert_eq!(tier, Tier::Deep);
                assert_eq!(format, OutputFormat::Json);
                assert!(output.is_none());
            }
            _ => panic!("expected transcribe"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["transcriptor", "providers", "--json-logs", "--config", "/tmp/c.yaml"]);
        assert!(cli.json_logs);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert!(matches!(cli.command, Commands::Providers { tier: Tier::Quick }));
    }
}
