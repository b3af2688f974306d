//! Parser for the `/info/refs?service=git-upload-pack` advertisement

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;

use super::pktline::{self, Packet, PktLineError, PktReader};
use crate::error::{ArchiveError, Result};
use crate::model::{ObjectId, RefMap};

const SERVICE_LINE: &[u8] = b"# service=git-upload-pack\n";

fn malformed(e: PktLineError) -> ArchiveError {
    match e {
        PktLineError::Io(e) => ArchiveError::transport(None, e.to_string()),
        other => ArchiveError::MalformedAdvertisement(other.to_string()),
    }
}

/// Parse a ref advertisement into a refs map
///
/// Capabilities on the first ref line are discarded, as are refs outside
/// `refs/` (e.g. `HEAD`) and refs pointing at the all-zeros id.
pub async fn parse_advertisement<R: AsyncRead + Unpin>(body: R) -> Result<RefMap> {
    let mut reader = PktReader::new(body);
    let mut refs = RefMap::new();
    let mut first = true;
    let mut saw_banner = false;
    let mut banner_pending = false;
    // Some servers end an empty repository's advertisement right after the banner
    let mut eof_ok = false;

    loop {
        let line = match reader.read_packet().await.map_err(malformed)? {
            None if eof_ok => break,
            None => {
                return Err(ArchiveError::MalformedAdvertisement(
                    "stream ended before flush".into(),
                ));
            }
            Some(Packet::Flush) if banner_pending => {
                banner_pending = false;
                eof_ok = true;
                continue;
            }
            Some(Packet::Flush) => break,
            Some(Packet::Data(line)) => line,
        };
        eof_ok = false;

        if banner_pending {
            return Err(ArchiveError::MalformedAdvertisement(
                "expected flush after service line".into(),
            ));
        }
        if first && !saw_banner && line == SERVICE_LINE {
            saw_banner = true;
            banner_pending = true;
            continue;
        }
        if first && line.starts_with(b"ERR ") {
            let msg = String::from_utf8_lossy(&line[4..]).trim_end().to_string();
            return Err(ArchiveError::RemoteRefused(msg));
        }

        let line = if first {
            first = false;
            line.split(|&b| b == 0).next().unwrap_or(line)
        } else {
            line
        };
        parse_ref_line(line, &mut refs)?;
    }

    Ok(refs)
}

fn parse_ref_line(line: &[u8], refs: &mut RefMap) -> Result<()> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ArchiveError::MalformedAdvertisement("ref line is not UTF-8".into()))?;
    let text = text.strip_suffix('\n').unwrap_or(text);

    let (oid, name) = text
        .split_once(' ')
        .ok_or_else(|| ArchiveError::MalformedAdvertisement(format!("bad ref line {text:?}")))?;
    let oid = ObjectId::parse(oid)
        .ok_or_else(|| ArchiveError::MalformedAdvertisement(format!("bad object id {oid:?}")))?;

    if oid.is_null() || !name.starts_with("refs/") {
        return Ok(());
    }
    refs.insert(name.to_string(), oid);
    Ok(())
}

/// Render `refs` the way a server advertises them
///
/// The inverse of [`parse_advertisement`] up to the discarded capabilities.
pub fn render_advertisement(refs: &RefMap, capabilities: &str) -> Bytes {
    let mut buf = BytesMut::new();
    pktline::encode_into(&mut buf, SERVICE_LINE);
    buf.extend_from_slice(&pktline::flush());
    for (i, (name, oid)) in refs.iter().enumerate() {
        let line = if i == 0 {
            format!("{oid} {name}\0{capabilities}\n")
        } else {
            format!("{oid} {name}\n")
        };
        pktline::encode_into(&mut buf, line.as_bytes());
    }
    buf.extend_from_slice(&pktline::flush());
    buf.freeze()
}
