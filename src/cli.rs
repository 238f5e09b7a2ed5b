use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vestnik", about = "Multi-source news aggregator with AI enrichment and Telegram digests")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Run one full cycle: fetch, enrich, record stats
    Cycle,

    /// Build and send the Telegram digest for a date (default: today)
    Digest {
        /// Target date, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },

    /// Reprocess articles whose content extraction likely failed
    Reprocess {
        /// Maximum articles to sweep
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Re-extract content before re-running enrichment
        #[arg(long)]
        reextract: bool,
    },
}
