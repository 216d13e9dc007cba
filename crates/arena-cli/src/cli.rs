//! Command-line interface for the debate arena.

use std::path::PathBuf;

use arena::RunMode;
use clap::{Parser, Subcommand};

/// Debate Arena
///
/// Runs multi-participant debates against an OpenAI-style chat-completions
/// endpoint and prints the transcript and final verdict.
#[derive(Parser, Debug)]
#[command(name = "debate-arena")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Engine configuration file (TOML). `ARENA_*` variables override it.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a debate template to completion
    Run {
        /// Template file (.toml or .json)
        #[arg(short, long, value_name = "PATH")]
        template: PathBuf,

        /// auto drives every phase; step waits for Enter between phases
        #[arg(short, long, default_value = "auto")]
        mode: RunMode,

        /// Override the template topic
        #[arg(long)]
        topic: Option<String>,

        /// Override the template round count
        #[arg(long)]
        rounds: Option<u32>,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "1800")]
        timeout_secs: u64,
    },

    /// Validate a template file and print its phase plan
    Validate {
        /// Template file (.toml or .json)
        #[arg(short, long, value_name = "PATH")]
        template: PathBuf,
    },

    /// Check that the inference endpoint answers
    Probe,
}
