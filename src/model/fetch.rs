//! Fetch records, pack-refs and have-sets

use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;

use super::refs::{ObjectId, RefMap};

/// Prefix marking a pack-ref for which no blob was written
pub const EMPTY_PACK_PREFIX: &str = "EMPTY|";

/// Opaque, globally unique name of a pack blob
///
/// `{url}|{unix-nanos}` for stored packs, `EMPTY|{url}|{unix-nanos}` when the
/// fetch received no objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackRef(String);

impl PackRef {
    pub fn stored(url: &str, at: OffsetDateTime) -> Self {
        PackRef(format!("{}|{}", url, at.unix_timestamp_nanos()))
    }

    pub fn empty(url: &str, at: OffsetDateTime) -> Self {
        PackRef(format!("{}{}|{}", EMPTY_PACK_PREFIX, url, at.unix_timestamp_nanos()))
    }

    /// Wrap a pack-ref read back from the index
    pub fn from_stored(s: String) -> Self {
        PackRef(s)
    }

    pub fn is_empty_pack(&self) -> bool {
        self.0.starts_with(EMPTY_PACK_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One immutable row of the archive index
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub name: String,
    /// Empty when the repository is not a fork
    pub parent: String,
    pub timestamp: OffsetDateTime,
    pub refs: RefMap,
    pub pack_id: i64,
    pub pack_ref: PackRef,
}

/// What the archive already holds for a repository (and its fork parent)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Haves {
    /// Union of ref values, ordered so `have` lines are deterministic
    pub oids: BTreeSet<ObjectId>,
    /// pack_ids the next pack may depend on, self before parent
    pub deps: Vec<i64>,
    /// The repository itself has been fetched before
    pub known: bool,
}

impl Haves {
    /// The repository has no record of its own. A fork may still carry
    /// its parent's haves.
    pub fn is_clone(&self) -> bool {
        !self.known
    }

    pub fn absorb(&mut self, refs: &RefMap, pack_id: i64) {
        self.oids.extend(refs.values().cloned());
        self.deps.push(pack_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistState {
    Blacklisted,
    Whitelisted,
    Neutral,
}

impl fmt::Display for BlacklistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlacklistState::Blacklisted => "blacklisted",
            BlacklistState::Whitelisted => "whitelisted",
            BlacklistState::Neutral => "neutral",
        };
        f.write_str(s)
    }
}
