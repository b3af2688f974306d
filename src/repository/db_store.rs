//! Database implementation of ArchiveStore and WorkQueue

use crate::error::Result;
use crate::model::{Haves, WorkItem};

use super::database::{Database, NewFetch};
use super::store::{ArchiveStore, WorkQueue};

impl ArchiveStore for Database {
    async fn get_haves(&self, name: &str, parent_hint: Option<&str>) -> Result<Haves> {
        Database::get_haves(self, name, parent_hint).await
    }

    async fn add_fetch(&self, fetch: &NewFetch<'_>) -> Result<i64> {
        Database::add_fetch(self, fetch).await
    }
}

impl WorkQueue for Database {
    async fn pop(&self) -> Result<Option<WorkItem>> {
        self.pop_queue().await
    }
}
