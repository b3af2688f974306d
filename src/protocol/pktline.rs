//! pkt-line framing for the smart-HTTP transport
//!
//! Each frame is `LLLL<payload>` where `LLLL` is the total length in hex,
//! header included. `0000` is a flush packet, never an empty payload.
//!
//! ```text
//! 001e# service=git-upload-pack\n
//! 0000
//! 0054want <oid> ofs-delta side-band-64k thin-pack\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest legal frame length, header included
pub const MAX_PKT_LEN: usize = 65524;
/// Largest payload a single frame can carry
pub const MAX_PAYLOAD_LEN: usize = MAX_PKT_LEN - 4;

const FLUSH: &[u8; 4] = b"0000";

/// A decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Flush,
    Data(&'a [u8]),
}

#[derive(Error, Debug)]
pub enum PktLineError {
    #[error("invalid length header {0:?}")]
    BadHeader(String),

    #[error("frame length {0} out of range")]
    BadLength(usize),

    #[error("stream ended inside a frame")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frame `payload` as a single pkt-line
pub fn encode(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    encode_into(&mut buf, payload);
    buf.freeze()
}

pub fn encode_into(buf: &mut BytesMut, payload: &[u8]) {
    debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
    buf.put_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    buf.put_slice(payload);
}

pub fn flush() -> Bytes {
    Bytes::from_static(FLUSH)
}

/// Re-encode a decoded frame
pub fn encode_packet(packet: Packet<'_>) -> Bytes {
    match packet {
        Packet::Flush => flush(),
        Packet::Data(payload) => encode(payload),
    }
}

fn parse_len(header: &[u8; 4]) -> Result<usize, PktLineError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| PktLineError::BadHeader(String::from_utf8_lossy(header).into_owned()))?;
    let len = usize::from_str_radix(text, 16)
        .map_err(|_| PktLineError::BadHeader(text.to_string()))?;
    if len != 0 && !(4..=MAX_PKT_LEN).contains(&len) {
        return Err(PktLineError::BadLength(len));
    }
    Ok(len)
}

/// Decode the next frame from `data`
///
/// Returns the frame and the number of bytes it occupied, or `None` if
/// `data` does not yet hold a complete frame.
pub fn decode(data: &[u8]) -> Result<Option<(Packet<'_>, usize)>, PktLineError> {
    let Some(header) = data.first_chunk::<4>() else {
        return Ok(None);
    };
    let len = parse_len(header)?;
    if len == 0 {
        return Ok(Some((Packet::Flush, 4)));
    }
    if data.len() < len {
        return Ok(None);
    }
    Ok(Some((Packet::Data(&data[4..len]), len)))
}

/// Streaming frame reader over any async byte source
///
/// Holds one reusable payload buffer; a frame is never larger than
/// [`MAX_PAYLOAD_LEN`], so memory stays bounded however long the stream is.
pub struct PktReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PktReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(MAX_PAYLOAD_LEN),
        }
    }

    /// Read the next frame; `None` at a clean end of stream
    pub async fn read_packet(&mut self) -> Result<Option<Packet<'_>>, PktLineError> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(PktLineError::Truncated)
                };
            }
            filled += n;
        }

        let len = parse_len(&header)?;
        if len == 0 {
            return Ok(Some(Packet::Flush));
        }

        let body = len - 4;
        self.buf.resize(body, 0);
        self.inner
            .read_exact(&mut self.buf[..body])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => PktLineError::Truncated,
                _ => PktLineError::Io(e),
            })?;
        Ok(Some(Packet::Data(&self.buf[..body])))
    }
}
