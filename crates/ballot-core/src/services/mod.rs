//! Services shared by every client: the store handle, the UI facade and
//! ballot submission.

mod ballot_store;
mod local_store;
mod voting;

pub use ballot_store::BallotStore;
pub use local_store::LocalStore;
pub use voting::VoteService;
