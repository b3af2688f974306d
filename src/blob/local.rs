//! Local filesystem blob store.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use super::{BlobStore, BlobWriter};

const PARTIAL_DIR: &str = ".partial";

/// Stores each blob as one file under a root directory.
///
/// ```text
/// {root}/
///   .partial/              # writers in flight (or abandoned by a crash)
///   https%3A%2F%2Fgithub.com%2Falice%2Frepo.git%7C1700000000000000000
/// ```
///
/// Names are escaped so any pack-ref maps to a single flat file name.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(PARTIAL_DIR)).await?;
        Ok(Self { root })
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(escape(name))
    }
}

fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    // Never collide with dot-files such as the partial directory
    if out.starts_with('.') {
        out.replace_range(..1, "%2E");
    }
    out
}

fn unescape(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn new_writer(&self, name: &str) -> io::Result<Box<dyn BlobWriter>> {
        let dest = self.blob_path(name);
        if fs::try_exists(&dest).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("blob {name} already exists"),
            ));
        }
        let partial = self.root.join(PARTIAL_DIR).join(escape(name));
        let file = File::create(&partial).await?;
        Ok(Box::new(LocalBlobWriter {
            partial,
            dest,
            file: BufWriter::new(file),
        }))
    }

    async fn exists(&self, name: &str) -> io::Result<bool> {
        fs::try_exists(self.blob_path(name)).await
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str().and_then(unescape) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

pub struct LocalBlobWriter {
    partial: PathBuf,
    dest: PathBuf,
    file: BufWriter<File>,
}

impl AsyncWrite for LocalBlobWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

#[async_trait]
impl BlobWriter for LocalBlobWriter {
    async fn close(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        // hard_link refuses an existing destination, so a published blob is never replaced
        fs::hard_link(&self.partial, &self.dest).await?;
        fs::remove_file(&self.partial).await?;
        Ok(())
    }

    async fn discard(self: Box<Self>) -> io::Result<()> {
        let partial = self.partial.clone();
        drop(self);
        match fs::remove_file(&partial).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
