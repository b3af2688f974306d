//! Fetch protocol driver
//!
//! Runs one smart-HTTP upload-pack negotiation against a remote:
//!
//! 1. GET `{url}/info/refs?service=git-upload-pack` -> ref advertisement
//! 2. Drop `refs/pull/*`, compute wants = advertised ids not in the have-set
//! 3. POST wants + haves to `{url}/git-upload-pack`
//! 4. Stream the side-band pack straight into a fresh blob
//!
//! Pack contents are never parsed; the thin pack's missing bases are
//! accounted for by the dependency edges the caller records.

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::advertisement::parse_advertisement;
use super::pktline;
use super::progress::ProgressSink;
use super::sideband::{DemuxSinks, demux_upload_pack};
use crate::blob::BlobStore;
use crate::error::{ArchiveError, Result};
use crate::metrics::Metrics;
use crate::model::{ObjectId, PackRef, RefMap, strip_pull_refs};

/// Capabilities requested on the first want line
pub const CAPABILITIES: &str = "ofs-delta side-band-64k thin-pack";

pub const DEFAULT_USER_AGENT: &str = concat!("gitarchive/", env!("CARGO_PKG_VERSION"));

/// Connect and per-read timeout; a remote that stops sending fails the fetch
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

const REQUEST_CONTENT_TYPE: &str = "application/x-git-upload-pack-request";
const RESULT_CONTENT_TYPE: &str = "application/x-git-upload-pack-result";

/// What the remote sent for the requested wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackOutcome {
    /// No new objects; no blob was written
    Empty,
    Stored { pack_ref: PackRef, bytes_fetched: u64 },
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Advertised refs, `refs/pull/*` removed
    pub refs: RefMap,
    pub wants: Vec<ObjectId>,
    pub pack: PackOutcome,
}

impl FetchOutcome {
    pub fn bytes_fetched(&self) -> u64 {
        match &self.pack {
            PackOutcome::Empty => 0,
            PackOutcome::Stored { bytes_fetched, .. } => *bytes_fetched,
        }
    }
}

/// Sorted, de-duplicated ids in `refs` that are not already held
pub fn want_set(refs: &RefMap, haves: &BTreeSet<ObjectId>) -> Vec<ObjectId> {
    refs.values()
        .filter(|oid| !haves.contains(*oid))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Build the upload-pack request body
///
/// ```text
/// 0054want <oid> ofs-delta side-band-64k thin-pack\n
/// 0032want <oid>\n
/// 0000
/// 0032have <oid>\n
/// 0009done\n
/// ```
pub fn build_request<'a>(
    wants: &[ObjectId],
    haves: impl IntoIterator<Item = &'a ObjectId>,
) -> Bytes {
    let mut body = BytesMut::new();
    let mut last: Option<&ObjectId> = None;
    for want in wants {
        if last == Some(want) {
            continue;
        }
        let line = match last {
            None => format!("want {want} {CAPABILITIES}\n"),
            Some(_) => format!("want {want}\n"),
        };
        pktline::encode_into(&mut body, line.as_bytes());
        last = Some(want);
    }
    body.extend_from_slice(&pktline::flush());
    for have in haves {
        pktline::encode_into(&mut body, format!("have {have}\n").as_bytes());
    }
    pktline::encode_into(&mut body, b"done\n");
    body.freeze()
}

fn body_reader(resp: reqwest::Response) -> impl AsyncRead + Unpin {
    let stream = resp.bytes_stream().map_err(std::io::Error::other);
    StreamReader::new(Box::pin(stream))
}

fn check_status(resp: &reqwest::Response, what: &str) -> Result<()> {
    match resp.status() {
        StatusCode::OK => Ok(()),
        status => Err(ArchiveError::transport(Some(status.as_u16()), what)),
    }
}

/// HTTP client for upload-pack fetches
#[derive(Clone)]
pub struct FetchClient {
    http: reqwest::Client,
    metrics: Option<Arc<Metrics>>,
}

impl FetchClient {
    /// `timeout` bounds connecting and each read, not the whole transfer,
    /// so large packs still stream as long as bytes keep arriving
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { http, metrics: None })
    }

    /// Count pack bytes into `metrics.fetchbytes` as they stream in
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch everything `url` has beyond `haves` into a new blob in `blobs`
    ///
    /// `progress` is finished on every return, successful or not.
    pub async fn fetch(
        &self,
        url: &str,
        haves: &BTreeSet<ObjectId>,
        blobs: &dyn BlobStore,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome> {
        let result = self.negotiate(url, haves, blobs, progress).await;
        progress.finish();
        result
    }

    async fn negotiate(
        &self,
        url: &str,
        haves: &BTreeSet<ObjectId>,
        blobs: &dyn BlobStore,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome> {
        let resp = self
            .http
            .get(format!("{url}/info/refs?service=git-upload-pack"))
            .send()
            .await?;
        check_status(&resp, "GET /info/refs")?;

        let mut refs = parse_advertisement(body_reader(resp)).await?;
        strip_pull_refs(&mut refs);

        let wants = want_set(&refs, haves);
        debug!(url, refs = refs.len(), wants = wants.len(), haves = haves.len(), "negotiating");
        if wants.is_empty() {
            return Ok(FetchOutcome {
                refs,
                wants,
                pack: PackOutcome::Empty,
            });
        }

        let resp = self
            .http
            .post(format!("{url}/git-upload-pack"))
            .header(CONTENT_TYPE, REQUEST_CONTENT_TYPE)
            .header(ACCEPT, RESULT_CONTENT_TYPE)
            .body(build_request(&wants, haves))
            .send()
            .await?;
        check_status(&resp, "POST /git-upload-pack")?;

        let pack_ref = PackRef::stored(url, OffsetDateTime::now_utc());
        let mut writer = blobs
            .new_writer(pack_ref.as_str())
            .await
            .map_err(ArchiveError::blob(pack_ref.as_str()))?;

        // On error the writer is dropped unpublished; its partial bytes stay
        // in the store for the reaper.
        let bytes_fetched = demux_upload_pack(
            body_reader(resp),
            DemuxSinks {
                pack: &mut writer,
                pack_name: pack_ref.as_str(),
                progress,
                bytes_counter: self.metrics.as_deref().map(|m| &m.fetchbytes),
            },
        )
        .await?;

        if bytes_fetched == 0 {
            writer
                .discard()
                .await
                .map_err(ArchiveError::blob(pack_ref.as_str()))?;
            return Ok(FetchOutcome {
                refs,
                wants,
                pack: PackOutcome::Empty,
            });
        }

        writer
            .close()
            .await
            .map_err(ArchiveError::blob(pack_ref.as_str()))?;
        Ok(FetchOutcome {
            refs,
            wants,
            pack: PackOutcome::Stored {
                pack_ref,
                bytes_fetched,
            },
        })
    }
}
