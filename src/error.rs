//! Error taxonomy for the fetch-and-archive worker

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// HTTP request failed outright (`status` is None) or returned non-200
    #[error("transport error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("malformed ref advertisement: {0}")]
    MalformedAdvertisement(String),

    #[error("malformed upload-pack response: {0}")]
    MalformedResponse(String),

    #[error("remote refused: {0}")]
    RemoteRefused(String),

    #[error("remote aborted: {msg}")]
    RemoteAborted { msg: String },

    #[error("blob write failed for {name}: {source}")]
    BlobWriteFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("index {op} failed: {source}")]
    IndexFailed {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("queue pop failed: {0}")]
    QueueFailed(String),
}

impl ArchiveError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        ArchiveError::Transport {
            status,
            message: message.into(),
        }
    }

    /// Returns a closure wrapping an sqlx error with the failing operation
    pub fn index(op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| ArchiveError::IndexFailed { op, source }
    }

    pub fn blob(name: &str) -> impl FnOnce(std::io::Error) -> Self {
        let name = name.to_string();
        move |source| ArchiveError::BlobWriteFailed { name, source }
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(e: reqwest::Error) -> Self {
        ArchiveError::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
