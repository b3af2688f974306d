mod fetch;
mod refs;
mod work;

pub use fetch::{BlacklistState, FetchRecord, Haves, PackRef, EMPTY_PACK_PREFIX};
pub use refs::{strip_pull_refs, ObjectId, RefMap, PULL_REF_PREFIX};
pub use work::{repo_url, WorkItem, DEFAULT_HOST};
