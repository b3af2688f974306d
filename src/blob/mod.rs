//! Object-store abstraction for pack blobs.
//!
//! Blobs are addressed by their pack-ref string. A blob is written once
//! through a streaming [`BlobWriter`] and never rewritten.

mod local;

pub use local::LocalBlobStore;

use async_trait::async_trait;
use std::io;
use tokio::io::AsyncWrite;

/// Streaming sink for a single blob
///
/// Nothing is visible under the blob's name until [`close`](BlobWriter::close)
/// succeeds.
#[async_trait]
pub trait BlobWriter: AsyncWrite + Send + Unpin {
    /// Flush and publish the blob; fails if the name is already taken
    async fn close(self: Box<Self>) -> io::Result<()>;

    /// Drop everything written so far without publishing
    async fn discard(self: Box<Self>) -> io::Result<()>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn new_writer(&self, name: &str) -> io::Result<Box<dyn BlobWriter>>;

    async fn exists(&self, name: &str) -> io::Result<bool>;

    /// Names of all published blobs
    async fn list(&self) -> io::Result<Vec<String>>;
}
