//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kudo-rag",
    version,
    about = "Retrieval over Kudo refereeing rules",
    long_about = "kudo-rag indexes pre-chunked passages from the Kudo rule books and retrieves \
                  the most relevant ones for a refereeing question, using query reformulation, \
                  reciprocal rank fusion and optional cross-encoder reranking."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/kudo-rag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file
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
    /// Index passages from a JSON Lines file
    Index {
        /// Passages file, one JSON object per line
        file: PathBuf,

        /// Drop the existing collection first
        #[arg(long)]
        rebuild: bool,
    },

    /// Retrieve passages relevant to a question
    Query {
        /// Question text
        query: String,

        /// Number of passages to return (overrides config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict to one category (e.g. "sanctions")
        #[arg(long)]
        category: Option<String>,

        /// Metadata filter as key=value, repeatable
        #[arg(short, long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Previous exchanges to prepend, repeatable (last 3 are used)
        #[arg(long = "context", value_name = "TEXT")]
        context: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Split a complex question into sub-questions
    Decompose {
        /// Question to decompose
        question: String,
    },

    /// Show collection statistics
    Stats {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
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
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
