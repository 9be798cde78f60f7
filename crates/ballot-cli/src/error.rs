use std::io;

use ballot_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ballot_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record ID cannot be empty")]
    EmptyId,
    #[error("No {entity} found with id {id}")]
    NotFound { entity: String, id: String },
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("Sync is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY (or add them to .env).")]
    SyncNotConfigured,
    #[error("Sync finished with errors: {0}")]
    SyncFailed(String),
}
