//! Persistence and queue traits consumed by the worker
//!
//! Decouple the fetch loop from the concrete SQLite index and queue.

use crate::error::Result;
use crate::model::{Haves, WorkItem};

use super::database::NewFetch;

/// Archive index operations on the worker's path
#[allow(async_fn_in_trait)]
pub trait ArchiveStore {
    /// Refs and pack_ids already archived for `name` (and its fork parent)
    async fn get_haves(&self, name: &str, parent_hint: Option<&str>) -> Result<Haves>;

    /// Record a fetch with its dependency edges; returns the new pack_id
    async fn add_fetch(&self, fetch: &NewFetch<'_>) -> Result<i64>;
}

/// Source of repositories to fetch
#[allow(async_fn_in_trait)]
pub trait WorkQueue {
    /// Next item, or `None` when the queue is empty right now
    async fn pop(&self) -> Result<Option<WorkItem>>;
}
