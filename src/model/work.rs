/// Default hosting provider base for fetch URLs
pub const DEFAULT_HOST: &str = "https://github.com/";

/// One unit of work popped from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// `owner/repo`
    pub name: String,
    /// Upstream `owner/repo` this one was forked from
    pub parent: Option<String>,
}

impl WorkItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parent: None }
    }

    pub fn fork_of(name: impl Into<String>, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        Self {
            name: name.into(),
            parent: (!parent.is_empty()).then_some(parent),
        }
    }
}

/// Fetch URL for `owner/repo` under `host`
pub fn repo_url(host: &str, name: &str) -> String {
    format!("{}/{}.git", host.trim_end_matches('/'), name)
}
