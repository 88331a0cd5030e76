//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lyceum gacha engine tools
#[derive(Parser)]
#[command(name = "lyceumd")]
#[command(about = "Lyceum - philosopher gacha and progression engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides $LYCEUM_CONFIG and defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a pool's rarity distribution
    Rates {
        #[arg(long, default_value = "standard")]
        pool: String,
    },

    /// Check a catalog for consistency
    Validate {
        /// JSON catalog to check instead of the configured one
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Run pulls for a demo user against an in-memory store
    Simulate {
        #[arg(long, default_value = "demo")]
        user: String,

        #[arg(long, default_value = "standard")]
        pool: String,

        /// Number of pulls
        #[arg(long, default_value_t = 10)]
        pulls: u32,

        /// Use multi pulls
        #[arg(long)]
        multi: bool,

        #[arg(long)]
        seed: Option<u64>,

        /// Starting currency
        #[arg(long, default_value_t = 100)]
        balance: u64,
    },

    /// Write a default config file
    InitConfig {
        #[arg(long, default_value = "/etc/lyceum/config.toml")]
        path: PathBuf,
    },
}
