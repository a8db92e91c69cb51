//! Command-line interface for pranimitra
//!
//! Provides argument parsing using clap derive macros.

use crate::call::instruction::Service;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Live voice assistant for farmers
#[derive(Parser, Debug)]
#[command(
    name = "pranimitra",
    version,
    about = "Live voice assistant for farmers"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Place a call with the live assistant
    Call(CallArgs),

    /// Chat with the assistant by typing instead of calling
    Chat(ChatArgs),

    /// List available audio input devices
    Devices,

    /// Manage the local question log
    Questions {
        #[command(subcommand)]
        action: QuestionsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Args, Debug, Default)]
pub struct CallArgs {
    /// Language the assistant must answer in (e.g. Hindi, Telugu)
    #[arg(long, short = 'l', value_name = "LANG")]
    pub language: Option<String>,

    /// Service line: farming, animal-health, government-schemes, general-queries
    #[arg(long, short = 's', value_name = "SERVICE", value_parser = parse_service)]
    pub service: Option<Service>,

    /// Audio input device (e.g., hw:0)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Stream a WAV file instead of the microphone
    #[arg(long, value_name = "PATH")]
    pub input_wav: Option<PathBuf>,

    /// Knowledge base TOML with [[entries]] question/answer pairs
    #[arg(long, value_name = "PATH")]
    pub knowledge_base: Option<PathBuf>,

    /// Directory for the call recording
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Live model override
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Skip the post-call summary
    #[arg(long)]
    pub no_summary: bool,

    /// Do not log questions to the local question log
    #[arg(long)]
    pub no_log: bool,
}

#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Language the assistant must answer in (e.g. Hindi, Telugu)
    #[arg(long, short = 'l', value_name = "LANG")]
    pub language: Option<String>,

    /// Service line: farming, animal-health, government-schemes, general-queries
    #[arg(long, short = 's', value_name = "SERVICE", value_parser = parse_service)]
    pub service: Option<Service>,

    /// Knowledge base TOML with [[entries]] question/answer pairs
    #[arg(long, value_name = "PATH")]
    pub knowledge_base: Option<PathBuf>,

    /// Text model override
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Do not log questions to the local question log
    #[arg(long)]
    pub no_log: bool,
}

fn parse_service(s: &str) -> Result<Service, String> {
    s.parse().map_err(|e: crate::error::PraniError| e.to_string())
}

/// Question log actions
#[derive(Subcommand, Debug)]
pub enum QuestionsAction {
    /// Print every logged question
    List,
    /// Write the log to a dated text file
    Export {
        /// Target directory (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Delete every logged question
    Clear,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Print the built-in defaults as a TOML template
    Dump,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_defaults() {
        let cli = Cli::try_parse_from(["pranimitra", "call"]).unwrap();
        match cli.command {
            Commands::Call(args) => {
                assert!(args.language.is_none());
                assert!(args.service.is_none());
                assert!(args.input_wav.is_none());
                assert!(!args.no_summary);
                assert!(!args.no_log);
            }
            other => panic!("Expected Call, got {:?}", other),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_call_with_options() {
        let cli = Cli::try_parse_from([
            "pranimitra",
            "call",
            "--language",
            "Hindi",
            "--service",
            "animal-health",
            "--input-wav",
            "question.wav",
            "-o",
            "/tmp/calls",
            "--no-summary",
        ])
        .unwrap();

        let Commands::Call(args) = cli.command else {
            panic!("Expected Call");
        };
        assert_eq!(args.language.as_deref(), Some("Hindi"));
        assert_eq!(args.service, Some(Service::AnimalHealth));
        assert_eq!(args.input_wav, Some(PathBuf::from("question.wav")));
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/calls")));
        assert!(args.no_summary);
    }

    #[test]
    fn test_parse_rejects_unknown_service() {
        assert!(Cli::try_parse_from(["pranimitra", "call", "--service", "weather"]).is_err());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["pranimitra", "-vv", "devices"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Devices));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pranimitra", "devices", "-q", "--config", "c.toml"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn test_parse_questions_export() {
        let cli =
            Cli::try_parse_from(["pranimitra", "questions", "export", "--dir", "/tmp"]).unwrap();
        match cli.command {
            Commands::Questions {
                action: QuestionsAction::Export { dir },
            } => assert_eq!(dir, Some(PathBuf::from("/tmp"))),
            other => panic!("Expected questions export, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_and_completions() {
        let cli = Cli::try_parse_from(["pranimitra", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));

        let cli = Cli::try_parse_from(["pranimitra", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["pranimitra"]).is_err());
    }

    #[test]
    fn test_parse_chat_with_overrides() {
        let cli =
            Cli::try_parse_from(["pranimitra", "chat", "-l", "Telugu", "-s", "farming", "--no-log"])
                .unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.language.as_deref(), Some("Telugu"));
                assert_eq!(args.service, Some(Service::Farming));
                assert!(args.no_log);
                assert!(args.model.is_none());
            }
            other => panic!("Expected Chat, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_rejects_unknown_service() {
        assert!(Cli::try_parse_from(["pranimitra", "chat", "--service", "fishing"]).is_err());
    }
}
