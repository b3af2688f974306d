//! Object ids and reference snapshots

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Refs under this prefix are never archived nor used as have material
pub const PULL_REF_PREFIX: &str = "refs/pull/";

/// A 40-character lowercase hex SHA-1 object id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    pub const HEX_LEN: usize = 40;

    /// Parse a hex object id, rejecting anything but 40 lowercase hex digits
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| ObjectId(s.to_string()))
    }

    /// The all-zeros id servers use as a placeholder
    pub fn is_null(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ObjectId::parse(&s).ok_or_else(|| format!("invalid object id: {s:?}"))
    }
}

impl From<ObjectId> for String {
    fn from(oid: ObjectId) -> Self {
        oid.0
    }
}

/// Reference snapshot: refname -> object id, ordered by refname
pub type RefMap = BTreeMap<String, ObjectId>;

/// Drop every ref the archive must never record
pub fn strip_pull_refs(refs: &mut RefMap) {
    refs.retain(|name, _| !name.starts_with(PULL_REF_PREFIX));
}
