//! Side-band demultiplexer for the upload-pack response
//!
//! The response opens with the negotiation acknowledgements (`NAK`, or
//! `ACK <oid>`), then carries side-band-64k frames until a flush or EOF:
//!
//! ```text
//! 0008NAK\n
//! 0020\x01PACK....            channel 1: pack bytes
//! 0023\x02Counting objects..  channel 2: progress
//! 0012\x03object missing     channel 3: fatal
//! 0000
//! ```

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::pktline::{Packet, PktLineError, PktReader};
use super::progress::ProgressSink;
use crate::error::{ArchiveError, Result};
use crate::metrics::Counter;

const BAND_PACK: u8 = 1;
const BAND_PROGRESS: u8 = 2;
const BAND_ERROR: u8 = 3;

fn malformed(e: PktLineError) -> ArchiveError {
    match e {
        PktLineError::Io(e) => ArchiveError::transport(None, e.to_string()),
        other => ArchiveError::MalformedResponse(other.to_string()),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Acks,
    Bands,
}

/// Where demultiplexed bytes go
pub struct DemuxSinks<'a, W> {
    /// Channel-1 pack bytes
    pub pack: &'a mut W,
    /// Name of the pack blob, for error reports
    pub pack_name: &'a str,
    /// Channel-2 progress text
    pub progress: &'a dyn ProgressSink,
    /// Live byte counter, bumped as pack bytes arrive
    pub bytes_counter: Option<&'a Counter>,
}

/// Strip side-band multiplexing from an upload-pack response
///
/// Returns the number of pack bytes written; zero means the server had
/// nothing to send.
pub async fn demux_upload_pack<R, W>(body: R, mut sinks: DemuxSinks<'_, W>) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = PktReader::new(body);
    let mut phase = Phase::Acks;
    let mut bytes_fetched = 0u64;

    while let Some(packet) = reader.read_packet().await.map_err(malformed)? {
        let payload = match (phase, packet) {
            (Phase::Acks, Packet::Flush) => continue,
            (Phase::Bands, Packet::Flush) => break,
            (_, Packet::Data(payload)) => payload,
        };

        if phase == Phase::Acks {
            if payload.starts_with(b"NAK") {
                phase = Phase::Bands;
            } else if let Some(ack) = payload.strip_prefix(b"ACK ") {
                debug!(ack = %lossy(ack), "upload-pack acknowledgement");
                // A bare `ACK <oid>` ends negotiation; `continue`/`common`/`ready` do not
                if !lossy(ack).contains(' ') {
                    phase = Phase::Bands;
                }
            } else if let Some(msg) = payload.strip_prefix(b"ERR ") {
                return Err(ArchiveError::RemoteAborted { msg: lossy(msg) });
            } else {
                return Err(ArchiveError::MalformedResponse(format!(
                    "unexpected negotiation line {:?}",
                    lossy(payload)
                )));
            }
            continue;
        }

        let Some((&band, data)) = payload.split_first() else {
            return Err(ArchiveError::MalformedResponse("empty side-band frame".into()));
        };
        match band {
            BAND_PACK => {
                sinks
                    .pack
                    .write_all(data)
                    .await
                    .map_err(ArchiveError::blob(sinks.pack_name))?;
                bytes_fetched += data.len() as u64;
                if let Some(counter) = sinks.bytes_counter {
                    counter.add(data.len() as u64);
                }
            }
            BAND_PROGRESS => sinks.progress.message(data),
            BAND_ERROR => return Err(ArchiveError::RemoteAborted { msg: lossy(data) }),
            other => {
                return Err(ArchiveError::MalformedResponse(format!(
                    "unknown side-band channel {other}"
                )));
            }
        }
    }

    Ok(bytes_fetched)
}
