//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - simulate: run the engine against a JSON fixture
//! - config: print the effective configuration
//! - backoff: print the retry delay schedule
//! - fetch: request one page from the configured HTTP source

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::SwipeDirection;

/// Matchfeed - swipe-and-match feed engine
#[derive(Parser, Debug)]
#[command(name = "matchfeed")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine against a JSON fixture of candidates
    Simulate {
        /// Fixture file: {"candidates": [...], "matches": {"<id>": <score>}}
        fixture: PathBuf,

        /// Swipe sequence, comma separated (like, pass, l, p)
        #[arg(short, long, value_delimiter = ',')]
        swipes: Vec<SwipeDirection>,

        /// Undo the last swipe after the sequence
        #[arg(short, long)]
        undo: bool,
    },

    /// Print the effective configuration as YAML
    Config,

    /// Print the retry delay schedule
    Backoff {
        /// Sample the jitter instead of printing the range
        #[arg(short, long)]
        sample: bool,
    },

    /// Fetch one page of candidates from the configured source
    Fetch {
        /// Page number
        #[arg(short, long, default_value_t = 1)]
        page: u32,

        /// Override the source base URL
        #[arg(short, long)]
        base_url: Option<String>,
    },
}
