//! Asset transfer framing
//!
//! Wire layout of one frame, repeated back to back until the peer closes:
//!
//! ```text
//! [8 bytes: payload length, big-endian u64]
//! [2 bytes: name length, big-endian u16]
//! [name bytes, UTF-8]
//! [payload bytes]
//! ```
//!
//! The async reader validates the declared sizes against [`FrameLimits`]
//! before allocating anything for the frame.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the payload length field
pub const SIZE_FIELD_LEN: usize = 8;
/// Size of the name length field
pub const NAME_FIELD_LEN: usize = 2;
/// Both fixed-size fields together
pub const FIXED_HEADER_LEN: usize = SIZE_FIELD_LEN + NAME_FIELD_LEN;

const PAYLOAD_CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed inside frame header ({read} of {expected} bytes)")]
    TruncatedHeader { read: usize, expected: usize },
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("File name of {len} bytes exceeds limit of {limit} bytes")]
    NameTooLong { len: usize, limit: usize },
    #[error("File name is not valid UTF-8")]
    InvalidName,
    #[error("Connection closed after {received} of {expected} payload bytes")]
    TruncatedPayload { received: u64, expected: u64 },
}

/// Upper bounds applied to incoming frame headers
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_payload_bytes: u64,
    pub max_name_len: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 512 * 1024 * 1024,
            max_name_len: 255,
        }
    }
}

/// Decoded frame header; the payload follows on the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u64,
    pub name: String,
}

/// A complete in-memory frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Encode one frame
pub fn encode_frame(name: &str, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let name_len = u16::try_from(name.len()).map_err(|_| FrameError::NameTooLong {
        len: name.len(),
        limit: u16::MAX as usize,
    })?;

    let mut buf = Vec::with_capacity(FIXED_HEADER_LEN + name.len() + payload.len());
    buf.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    buf.extend_from_slice(&name_len.to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode one frame from the front of `buf`
///
/// Returns `Ok(None)` while the buffer does not yet hold a complete frame,
/// otherwise the frame and the number of bytes it occupied.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < FIXED_HEADER_LEN {
        return Ok(None);
    }

    let mut size = [0u8; SIZE_FIELD_LEN];
    size.copy_from_slice(&buf[..SIZE_FIELD_LEN]);
    let payload_len = u64::from_be_bytes(size);
    let name_len = u16::from_be_bytes([buf[8], buf[9]]) as usize;

    let name_end = FIXED_HEADER_LEN + name_len;
    if buf.len() < name_end {
        return Ok(None);
    }
    let name = std::str::from_utf8(&buf[FIXED_HEADER_LEN..name_end])
        .map_err(|_| FrameError::InvalidName)?
        .to_string();

    let payload_len = usize::try_from(payload_len).map_err(|_| FrameError::PayloadTooLarge {
        size: payload_len,
        limit: usize::MAX as u64,
    })?;
    let end = match name_end.checked_add(payload_len) {
        Some(end) => end,
        None => {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len as u64,
                limit: (usize::MAX - name_end) as u64,
            })
        }
    };
    if buf.len() < end {
        return Ok(None);
    }

    let frame = Frame {
        name,
        payload: buf[name_end..end].to_vec(),
    };
    Ok(Some((frame, end)))
}

/// Read until `buf` is full or the stream ends, returning the bytes read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn read_exact_field<R>(reader: &mut R, buf: &mut [u8], offset: usize) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let n = read_full(reader, buf).await?;
    if n < buf.len() {
        return Err(FrameError::TruncatedHeader {
            read: offset + n,
            expected: offset + buf.len(),
        });
    }
    Ok(())
}

/// Read the next frame header
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames. A stream that ends part-way through the header is an error.
pub async fn read_header<R>(reader: &mut R, limits: &FrameLimits) -> Result<Option<FrameHeader>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut size = [0u8; SIZE_FIELD_LEN];
    let n = read_full(reader, &mut size).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < SIZE_FIELD_LEN {
        return Err(FrameError::TruncatedHeader {
            read: n,
            expected: SIZE_FIELD_LEN,
        });
    }
    let payload_len = u64::from_be_bytes(size);
    if payload_len > limits.max_payload_bytes {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            limit: limits.max_payload_bytes,
        });
    }

    let mut name_len = [0u8; NAME_FIELD_LEN];
    read_exact_field(reader, &mut name_len, SIZE_FIELD_LEN).await?;
    let name_len = u16::from_be_bytes(name_len) as usize;
    if name_len > limits.max_name_len {
        return Err(FrameError::NameTooLong {
            len: name_len,
            limit: limits.max_name_len,
        });
    }

    let mut name = vec![0u8; name_len];
    read_exact_field(reader, &mut name, FIXED_HEADER_LEN).await?;
    let name = String::from_utf8(name).map_err(|_| FrameError::InvalidName)?;

    Ok(Some(FrameHeader { payload_len, name }))
}

/// Outcome of streaming one payload off the wire
#[derive(Debug)]
pub struct PayloadReceipt {
    /// Bytes consumed from the stream
    pub bytes: u64,
    /// SHA256 of the payload, hex encoded
    pub sha256: String,
    /// First write error; the rest of the payload was drained unwritten
    pub write_error: Option<std::io::Error>,
}

/// Stream exactly `len` payload bytes from `reader` into `sink`
///
/// With no sink, or once the sink fails, the remaining bytes are still read
/// and discarded so the next frame header lines up.
pub async fn stream_payload<R, W>(
    reader: &mut R,
    len: u64,
    mut sink: Option<&mut W>,
) -> Result<PayloadReceipt, FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; PAYLOAD_CHUNK];
    let mut remaining = len;
    let mut write_error = None;

    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(FrameError::TruncatedPayload {
                received: len - remaining,
                expected: len,
            });
        }
        hasher.update(&buf[..n]);

        let failed = match sink.as_mut() {
            Some(writer) => writer.write_all(&buf[..n]).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            write_error = Some(e);
            sink = None;
        }

        remaining -= n as u64;
    }

    if let Some(writer) = sink {
        if let Err(e) = writer.flush().await {
            write_error = Some(e);
        }
    }

    Ok(PayloadReceipt {
        bytes: len,
        sha256: hex::encode(hasher.finalize()),
        write_error,
    })
}
