//! Audit trail persistence for the surebet placer.
//!
//! Every decision, heal, order snapshot and fill is written as one JSON
//! line. Cleanup of a decision that never filled is a tombstone line, so
//! files are only ever appended to.

pub mod error;
pub mod record;
pub mod writer;

pub use error::{PersistenceError, PersistenceResult};
pub use record::{AuditKind, AuditRecord, AuditStore, MemoryStore};
pub use writer::JsonLinesStore;
