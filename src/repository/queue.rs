use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{ArchiveError, Result};
use crate::model::WorkItem;

use super::store::WorkQueue;

/// In-process FIFO queue
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl MemoryQueue {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WorkQueue for MemoryQueue {
    async fn pop(&self) -> Result<Option<WorkItem>> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| ArchiveError::QueueFailed(e.to_string()))?;
        Ok(items.pop_front())
    }
}
