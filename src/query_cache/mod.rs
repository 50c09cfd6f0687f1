//! In-memory query cache with staleness/GC windows and periodic persistence.

mod cache;
mod persister;

pub use cache::*;
pub use persister::*;
