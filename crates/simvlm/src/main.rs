//! simvlm CLI - inspect and maintain the embedding cache of similarity VLMs.
//!
//! Model code embeds through `simvlm-core`; this binary covers the chores
//! around it: printing configuration, computing cache keys, and looking into
//! or wiping a persistent store.
//!
//! # Usage
//!
//! ```bash
//! # Where would "cat" be stored for a given model configuration?
//! simvlm cache key --text cat --param checkpoint=ViT-B/32 --param num_frames=8
//!
//! # Store size and location
//! simvlm cache stats
//!
//! # Start from an empty store after changing a model
//! simvlm cache reset
//!
//! # View configuration
//! simvlm config show
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// simvlm - embedding cache maintenance for similarity-based video-language models.
#[derive(Parser, Debug)]
#[command(name = "simvlm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "SIMVLM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute cache keys and inspect or reset the embedding store
    Cache(cli::cache::CacheArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = cli::resolve_config(cli.config.as_deref())?;
    logging::init_from_config(&config.logging, cli.verbose, cli.json_logs);

    tracing::debug!("simvlm v{}", simvlm_core::VERSION);

    match cli.command {
        Commands::Cache(args) => cli::cache::execute(args, &config),
        Commands::Config(args) => cli::config::execute(args, cli.config.as_deref()),
    }
}
