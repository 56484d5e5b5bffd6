//! CLI - Command-line argument parsing
//!
//! Defines the CLI structure using clap.
//! Keeps argument parsing separate from execution logic.

use agora_shared::DEFAULT_URL;
use clap::{Parser, Subcommand};

/// Agora CLI
#[derive(Parser, Debug)]
#[command(name = "agoractl")]
#[command(about = "Agora - balanced answers on political topics", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// agorad base URL
    #[arg(long, global = true, env = "AGORA_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Subcommand (if not provided, starts an interactive chat)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a single question
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        /// Continue an existing session
        #[arg(long, short)]
        session: Option<String>,

        /// Show the reasoning transcript
        #[arg(long)]
        trace: bool,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Interactive conversation
    Chat {
        /// Resume an existing session
        #[arg(long, short)]
        session: Option<String>,

        /// Show the reasoning transcript after each reply
        #[arg(long)]
        trace: bool,
    },

    /// Show a session's history and state
    Show {
        session: String,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// End a session
    End { session: String },

    /// Run evaluation scenarios
    Eval {
        /// Built-in scenario id (repeatable; default all)
        #[arg(long = "scenario")]
        scenarios: Vec<String>,

        /// Use the daemon's deterministic fixtures
        #[arg(long)]
        offline: bool,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Show daemon health
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ask_joins_words() {
        let cli = Cli::parse_from(["agoractl", "ask", "what", "is", "a", "filibuster?"]);
        match cli.command {
            Some(Commands::Ask { question, session, .. }) => {
                assert_eq!(question.join(" "), "what is a filibuster?");
                assert!(session.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_eval_repeated_scenarios() {
        let cli = Cli::parse_from([
            "agoractl",
            "--url",
            "http://localhost:9000",
            "eval",
            "--offline",
            "--scenario",
            "immigration_debate",
            "--scenario",
            "primaries_2024",
        ]);
        assert_eq!(cli.url, "http://localhost:9000");
        match cli.command {
            Some(Commands::Eval { scenarios, offline, .. }) => {
                assert!(offline);
                assert_eq!(scenarios, vec!["immigration_debate", "primaries_2024"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_no_subcommand_means_chat() {
        let cli = Cli::parse_from(["agoractl"]);
        assert!(cli.command.is_none());
    }
}
