//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kbground",
    version,
    about = "Hybrid knowledge-base retrieval with citation-checked answers",
    long_about = "kbground indexes knowledge-base articles for vector and keyword search, fuses both \
                  rankings, and answers questions with a language model that must cite the retrieved \
                  articles. Answers whose citations cannot be verified are flagged or withheld."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/kbground/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question and get a cited answer
    Ask {
        /// Question to ask
        question: String,

        /// Only use articles from this category
        #[arg(short = 'C', long)]
        category: Option<String>,

        /// Number of articles to retrieve (defaults to retrieval.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show ranked articles without generating an answer
    Search {
        /// Search query text
        query: String,

        /// Only use articles from this category
        #[arg(short = 'C', long)]
        category: Option<String>,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Index article JSON files or directories
    Index {
        /// Files or directories containing article JSON
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "kbground", "ask", "How do I reset my password?", "-C", "IT", "-k", "3", "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Ask {
                question,
                category,
                top_k,
                json,
            } => {
                assert_eq!(question, "How do I reset my password?");
                assert_eq!(category.as_deref(), Some("IT"));
                assert_eq!(top_k, Some(3));
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["kbground", "search", "vpn", "--profile", "local", "-v"]).unwrap();
        assert_eq!(cli.profile.as_deref(), Some("local"));
        assert!(cli.verbose);
    }
}
