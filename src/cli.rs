use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gitarchive", about = "Incrementally fetch and archive git repositories")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite index (overrides the config file)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Root directory of the pack blob store (overrides the config file)
    #[arg(long, global = true)]
    pub blobs: Option<PathBuf>,

    /// Hide remote progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch queued repositories until interrupted
    Run,

    /// Queue a repository (`owner/repo`) for fetching
    Enqueue {
        name: String,

        /// Upstream `owner/repo` this repository was forked from
        #[arg(long)]
        parent: Option<String>,
    },

    /// Administer the blacklist
    Blacklist {
        #[command(subcommand)]
        action: BlacklistAction,
    },

    /// Show when a repository was last fetched
    Latest { name: String },

    /// Cross-check the index against the blob store
    Audit,
}

#[derive(Subcommand, Debug)]
pub enum BlacklistAction {
    Add { name: String },
    Show { name: String },
}
