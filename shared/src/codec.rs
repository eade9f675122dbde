//! Wire framing for the two channels.
//!
//! The reliable channel is a TCP stream carrying bincode messages behind a
//! u32 big-endian length prefix. The unreliable channel carries one bincode
//! message per UDP datagram with no prefix.

use crate::Message;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Catalog messages are tiny; anything larger
/// is a corrupt or hostile stream.
pub const MAX_FRAME_LEN: u32 = 16 * 1024;

/// Writes one length-prefixed message to the stream.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(msg)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed message from the stream.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary; mid-frame EOF and
/// oversized or undecodable frames are errors.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = bincode::deserialize(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(msg))
}

/// Encodes a message as a standalone datagram payload.
pub fn encode_datagram(msg: &Message) -> io::Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Decodes a datagram payload; `None` when the bytes are not a catalog
/// message (stray traffic on the port is expected and ignored).
pub fn decode_datagram(buf: &[u8]) -> Option<Message> {
    bincode::deserialize(buf).ok()
}
