//! Offline audit of the archive
//!
//! Surfaces the two partial-failure windows the worker can leave behind:
//! blobs written without a fetch record, and records missing dependency
//! edges. Also checks that every non-empty pack-ref has its blob.

use anyhow::{Context, Result};
use tracing::warn;

use crate::blob::BlobStore;
use crate::model::EMPTY_PACK_PREFIX;

use super::database::{DanglingDep, Database};

#[derive(Debug, Default)]
pub struct AuditReport {
    /// `(pack_id, name)` of records that follow an earlier fetch but have no edges
    pub under_linked: Vec<(i64, String)>,
    pub dangling_deps: Vec<DanglingDep>,
    /// Published blobs no fetch record points at
    pub orphan_blobs: Vec<String>,
    /// Non-empty pack-refs whose blob is missing
    pub missing_blobs: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.under_linked.is_empty()
            && self.dangling_deps.is_empty()
            && self.orphan_blobs.is_empty()
            && self.missing_blobs.is_empty()
    }
}

pub async fn audit(db: &Database, blobs: &dyn BlobStore) -> Result<AuditReport> {
    let under_linked = db.under_linked().await?;
    let dangling_deps = db.dangling_deps().await?;

    let recorded = db.pack_refs().await?;
    let stored = blobs.list().await.context("Failed to list blob store")?;

    let orphan_blobs: Vec<String> = stored
        .iter()
        .filter(|name| !recorded.contains(*name))
        .cloned()
        .collect();

    let stored: std::collections::HashSet<&String> = stored.iter().collect();
    let mut missing_blobs: Vec<String> = recorded
        .iter()
        .filter(|r| !r.starts_with(EMPTY_PACK_PREFIX) && !stored.contains(r))
        .cloned()
        .collect();
    missing_blobs.sort();

    for (pack_id, name) in &under_linked {
        warn!(pack_id, name = %name, "fetch record has no dependency edges");
    }
    for dep in &dangling_deps {
        warn!(id = dep.id, dep = dep.dep, "dependency edge points at unknown or later pack");
    }
    for name in &orphan_blobs {
        warn!(blob = %name, "orphaned pack blob");
    }
    for name in &missing_blobs {
        warn!(pack_ref = %name, "pack blob missing from store");
    }

    Ok(AuditReport {
        under_linked,
        dangling_deps,
        orphan_blobs,
        missing_blobs,
    })
}
