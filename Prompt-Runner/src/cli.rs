use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Feed a queue of prompts into a generation page, one at a time.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file. Built-in defaults apply when omitted.
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the browser and process pending prompts until the queue stops.
    Run,

    /// Append prompts to the queue.
    Add {
        /// One prompt per argument.
        #[arg(required = true)]
        texts: Vec<String>,

        /// Queue as video prompts.
        #[arg(long)]
        video: bool,
    },

    /// Show every prompt with its status.
    List,

    /// Reset prompts left mid-processing by a crash.
    Recover,

    /// Generate a batch of prompts and append it.
    Generate {
        /// Theme the prompts are derived from.
        #[arg(long)]
        context: String,

        #[arg(long, default_value_t = 10)]
        count: usize,

        #[arg(long)]
        video: bool,

        /// Longer, more detailed prompts.
        #[arg(long)]
        enhanced: bool,
    },
}
