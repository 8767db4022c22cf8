//! Line protocol shared by the client and the server.
//!
//! Each side sends exactly one line per connection:
//!
//! ```text
//! Client: HalloXXXX\n
//! Server: Hallo\n
//! ```
//!
//! There is no handshake, length prefix or error frame. A line ends at
//! `\n`; a preceding `\r` is dropped as well. Bytes are decoded as UTF-8,
//! replacing invalid sequences.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Longest line kept from a peer, terminator included. Bytes past this
/// limit are read and discarded up to the end of the line.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Prefix of the transcript line printed for every received message.
pub const RECEIVED_PREFIX: &str = "Message Received: ";

/// Read a single line from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream before sending any
/// byte. A final line without terminator is returned as-is. A line longer
/// than [`MAX_LINE_LENGTH`] is truncated to its first `MAX_LINE_LENGTH`
/// bytes; the rest of it is consumed from the stream.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::with_capacity(64);
    let mut seen = false;
    let mut discarded = 0usize;

    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            break;
        }
        seen = true;

        let (line, complete) = match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => (&chunk[..=pos], true),
            None => (chunk, false),
        };

        let keep = line.len().min(MAX_LINE_LENGTH - raw.len());
        raw.extend_from_slice(&line[..keep]);
        discarded += line.len() - keep;

        let used = line.len();
        reader.consume(used);
        if complete {
            break;
        }
    }

    if !seen {
        return Ok(None);
    }
    if discarded > 0 {
        debug!(kept = raw.len(), discarded, "Truncated long line");
    }

    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }

    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

/// Encode `text` as a wire line.
pub fn encode_line(text: &str) -> BytesMut {
    let mut line = BytesMut::with_capacity(text.len() + 1);
    line.put_slice(text.as_bytes());
    line.put_u8(b'\n');
    line
}

/// Write `text` as one line and flush it.
pub async fn write_line<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_line(text)).await?;
    writer.flush().await
}

/// Transcript line for a received message. A missing line prints as empty.
pub fn received(line: Option<&str>) -> String {
    format!("{RECEIVED_PREFIX}{}", line.unwrap_or_default())
}
