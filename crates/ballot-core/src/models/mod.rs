//! Data models for Ballot

mod candidate;
mod election;
mod kind;
mod partylist;
mod record;
mod session;
mod student;
mod sync_conflict;
mod tally;
pub mod timestamp;
mod vote;

pub use candidate::Candidate;
pub use election::{Election, ElectionStatus};
pub use kind::EntityKind;
pub use partylist::Partylist;
pub use record::{Envelope, RecordId};
pub use session::AdminSession;
pub use student::Student;
pub use sync_conflict::SyncConflict;
pub use tally::{elections_in, recompute_percentages, CandidateTally};
pub use vote::{Ballot, Vote};
