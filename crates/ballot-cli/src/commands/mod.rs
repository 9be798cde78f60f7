pub mod common;
pub mod completions;
pub mod records;
pub mod sync;
pub mod tallies;
pub mod watch;
