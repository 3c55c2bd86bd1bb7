//! The polling engine: claim a due feed, fetch it, parse it and persist
//! its items, one feed per tick.

mod clock;
mod persister;
mod scheduler;
mod selector;

pub use clock::{Clock, SystemClock};
pub use persister::{ingest_item, persist_post, CycleSummary, ItemOutcome, PersistOutcome};
pub use scheduler::{CycleReport, Scheduler};
pub use selector::{claim_next, ClaimError};
