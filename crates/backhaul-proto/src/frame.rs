//! Length-prefixed frame codec
//!
//! Wire format, bit exact:
//!
//! ```text
//! frame := FRAME_MAGIC (4 bytes)
//!       || LENGTH (u32 big-endian, byte length of BODY only)
//!       || BODY (bincode-serialized Packet)
//! ```

use crate::packet::{Packet, SequenceCounter};
use crate::{FRAME_MAGIC, HEADER_LEN, MAX_BODY_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed")]
    Eof,

    #[error("bad frame magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("truncated frame: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame body too large: {0} bytes")]
    BodyTooLarge(usize),

    #[error("packet body: {0}")]
    Body(#[from] bincode::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a packet into one wire frame.
///
/// A packet submitted with `sequence == 0` gets the counter's next value
/// assigned before serialization; the mutation is visible to the caller.
pub fn encode(packet: &mut Packet, counter: &SequenceCounter) -> Result<Bytes, FrameError> {
    if packet.sequence == 0 {
        packet.sequence = counter.next();
    }

    let body = bincode::serialize(packet)?;
    if body.len() > MAX_BODY_LEN as usize {
        return Err(FrameError::BodyTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_slice(&FRAME_MAGIC);
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);

    Ok(buf.freeze())
}

/// Decode one wire frame back into a packet.
///
/// Never partially succeeds: a short buffer, a magic mismatch, or a body the
/// deserializer rejects all fail with a `FrameError`. Bytes trailing a
/// complete frame are ignored.
pub fn decode(mut buf: Bytes) -> Result<Packet, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            expected: HEADER_LEN,
            actual: buf.len(),
        });
    }

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != FRAME_MAGIC {
        return Err(FrameError::BadMagic(magic));
    }

    let len = buf.get_u32() as usize;
    if len > MAX_BODY_LEN as usize {
        return Err(FrameError::BodyTooLarge(len));
    }
    if buf.remaining() < len {
        return Err(FrameError::Truncated {
            expected: len,
            actual: buf.remaining(),
        });
    }

    let body = buf.split_to(len);
    Ok(bincode::deserialize(&body)?)
}

/// Read exactly one frame from the connection.
///
/// A connection that closes on a frame boundary, before any header byte, is
/// the orderly `FrameError::Eof`. A close after a partial header or body is
/// `FrameError::Truncated`; the caller must treat the connection as faulted.
pub async fn read_frame<R>(reader: &mut R) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    fill(reader, &mut header, true).await?;

    let magic = [header[0], header[1], header[2], header[3]];
    if magic != FRAME_MAGIC {
        return Err(FrameError::BadMagic(magic));
    }

    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_BODY_LEN as usize {
        return Err(FrameError::BodyTooLarge(len));
    }

    let mut body = vec![0u8; len];
    fill(reader, &mut body, false).await?;

    Ok(bincode::deserialize(&body)?)
}

/// Fill `buf` completely, mapping a close before the first byte to `Eof`
/// (only when `eof_is_orderly`) and any later short delivery to `Truncated`.
async fn fill<R>(reader: &mut R, buf: &mut [u8], eof_is_orderly: bool) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 && eof_is_orderly {
                return Err(FrameError::Eof);
            }
            return Err(FrameError::Truncated {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Encode and write one frame, assigning a sequence number if needed.
pub async fn write_frame<W>(
    writer: &mut W,
    packet: &mut Packet,
    counter: &SequenceCounter,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(packet, counter)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
