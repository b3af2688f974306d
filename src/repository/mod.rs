mod audit;
mod database;
mod db_store;
mod queue;
mod store;

pub use audit::{audit, AuditReport};
pub use database::{DanglingDep, Database, NewFetch};
pub use queue::MemoryQueue;
pub use store::{ArchiveStore, WorkQueue};

// Bumped whenever the index tables change shape
pub const SCHEMA_VERSION: &str = "1";
