//! Durable record sink for the session runtime.
//!
//! The runtime materializes events into append-mostly records through the
//! [`Repository`] trait; the in-memory implementation backs tests and
//! single-process deployments. Database-backed implementations plug in at
//! the same seam.

pub mod memory;
pub mod records;
pub mod repository;

pub use memory::MemoryRepository;
pub use records::{
    AgentRecord, InterventionRecord, MessageRecord, RelayMessageRecord, SessionRecord,
    SessionUpdate, StationRecord,
};
pub use repository::Repository;
