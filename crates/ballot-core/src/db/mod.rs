//! Database layer for Ballot

mod conflict_repository;
mod connection;
mod entities;
mod migrations;
mod session_repository;
mod table;
mod tally_repository;

pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use connection::Database;
pub use session_repository::{SessionRepository, SqliteSessionRepository};
pub use table::{ChildLink, OnParentDelete, ParentLink, SqliteTable, SyncEntity};
pub use tally_repository::{SqliteTallyRepository, TallyRepository};
