//! ballot-core - Core library for Ballot
//!
//! This crate contains the shared models, the local `SQLite` store and the
//! offline-first sync engine used by every Ballot client. Local writes always
//! succeed; dirty rows are pushed and the remote is pulled and merged with
//! last-writer-wins whenever connectivity allows.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{
    AdminSession, Ballot, Candidate, CandidateTally, Election, ElectionStatus, EntityKind,
    Partylist, RecordId, Student, SyncConflict, Vote,
};
pub use services::{BallotStore, LocalStore, VoteService};
pub use state::{SyncState, SyncStatus};
