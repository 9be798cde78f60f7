use std::path::PathBuf;

use ballot_core::EntityKind;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "ballot")]
#[command(about = "Administer school elections offline and sync when connected")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List records of one entity
    #[command(alias = "ls")]
    List {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record
    Get {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a record from a JSON object
    #[command(alias = "new")]
    Add {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Field values, e.g. '{"title": "President"}'
        #[arg(long, value_name = "JSON")]
        json: String,
    },
    /// Patch fields of a record
    Update {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record ID
        id: String,
        /// Fields to change, e.g. '{"max_votes_allowed": 2}'
        #[arg(long, value_name = "JSON")]
        json: String,
    },
    /// Delete a record (synced as a tombstone)
    #[command(alias = "rm")]
    Delete {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record ID
        id: String,
    },
    /// Show vote tallies
    Tallies {
        /// Election IDs (all elections when omitted)
        elections: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push local changes and pull remote changes once
    Sync {
        /// Output the per-entity report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status and pending local changes
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List remote writes dropped by last-writer-wins
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until interrupted
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// Entities editable from the command line
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EntityArg {
    #[value(alias = "election")]
    Elections,
    #[value(alias = "candidate")]
    Candidates,
    #[value(alias = "partylist")]
    Partylists,
    #[value(alias = "student")]
    Students,
}

impl EntityArg {
    pub const fn kind(self) -> EntityKind {
        match self {
            Self::Elections => EntityKind::Elections,
            Self::Candidates => EntityKind::Candidates,
            Self::Partylists => EntityKind::Partylists,
            Self::Students => EntityKind::Students,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
