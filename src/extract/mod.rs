//! Extraction core: per-entity state, vendor code classification, the
//! request/response bridge and the per-session scheduler.

pub mod bridge;
pub mod classify;
pub mod scheduler;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{Bridge, Outcome};
pub use classify::{classify, ErrorClass};
pub use scheduler::{Checkpoint, ConnectionState, RunSummary, Scheduler, SessionSettings};
pub use tracker::{Bar, EntityRecord, ErrorEntry, ExtractionStatus, Session, Tracker};
