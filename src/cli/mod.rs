//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::Direction;
use crate::mapping::Source;

pub mod commands;

/// crmsync - Reconcile local directory subjects with a remote CRM
#[derive(Parser, Debug)]
#[command(name = "crmsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (default: ~/.crmsync/config.json)
    #[arg(long, global = true, env = "CRMSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path (default: ~/.crmsync/data/directory.db)
    #[arg(long, global = true, env = "CRMSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Compute changes without writing to the remote CRM or the directory
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Base sync: checksum, activity link and account status
    Base {
        /// Only these subjects (default: all connected subjects)
        #[arg(long = "subject")]
        subjects: Vec<i64>,
    },

    /// Full field sync
    Full {
        /// Which side wins when values differ (local, remote, both)
        #[arg(long, default_value = "local")]
        direction: Direction,

        /// Only these subjects (default: all connected subjects)
        #[arg(long = "subject")]
        subjects: Vec<i64>,
    },

    /// Push changed local fields of one subject
    OnChange {
        #[arg(long)]
        subject: i64,

        /// Namespace of the changed fields (user, profile, account)
        #[arg(long, default_value = "profile")]
        source: Source,

        /// Changed field as `name` or `name=previous value`
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
    },

    /// Login sync of one subject
    Login {
        #[arg(long)]
        subject: i64,
    },

    /// Run the exclusive bulk sync job
    Job {
        /// Which side wins when values differ (local, remote, both)
        #[arg(long, default_value = "remote")]
        direction: Direction,

        /// Always run the full field sync
        #[arg(long)]
        manual: bool,
    },

    /// Inspect the field mapping
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },

    /// Inspect settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage subjects in the local directory
    Subject {
        #[command(subcommand)]
        command: SubjectCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand, Debug)]
pub enum MappingCommands {
    /// Parse the configured mapping and list it
    Check,

    /// List mappings sharing a remote sub-record with a local path
    Siblings {
        /// Full local path, e.g. profile.street
        path: String,

        /// Include the mapping itself
        #[arg(long)]
        include_self: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective settings (secrets redacted)
    Show,

    /// Print the resolved settings and database paths
    Path,
}

#[derive(Subcommand, Debug)]
pub enum SubjectCommands {
    /// Import subjects and field kinds from a JSONL file
    Import {
        file: PathBuf,
    },

    /// Show one subject
    Show {
        id: i64,
    },

    /// Set the kind of a local field (text, list)
    Kind {
        /// Full local path, e.g. profile.interests
        path: String,
        kind: String,
    },
}
