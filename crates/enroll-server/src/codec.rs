//! Wire framing.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON: `{"type": "...", "payload": "..."}`.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 4;

/// Largest frame body accepted unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// One typed message. `payload` is opaque to the codec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: String,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: payload.into(),
        }
    }

    /// Envelope with an empty payload.
    pub fn empty(message_type: impl Into<String>) -> Self {
        Self::new(message_type, String::new())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("stream ended mid-frame")]
    Truncated,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Length-prefixed JSON envelope codec for `FramedRead`/`FramedWrite`.
#[derive(Clone, Debug)]
pub struct EnvelopeCodec {
    max_frame_length: usize,
}

impl EnvelopeCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

fn parse_body(body: &[u8]) -> Result<Envelope, FramingError> {
    serde_json::from_slice(body).map_err(|e| FramingError::MalformedEnvelope(e.to_string()))
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, FramingError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_length {
            return Err(FramingError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            });
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let body = src.split_to(len);
        parse_body(&body).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, FramingError> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() => Ok(None),
            None => Err(FramingError::Truncated),
        }
    }
}

impl Encoder<&Envelope> for EnvelopeCodec {
    type Error = FramingError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<(), FramingError> {
        let body =
            serde_json::to_vec(item).map_err(|e| FramingError::MalformedEnvelope(e.to_string()))?;
        if body.len() > self.max_frame_length {
            return Err(FramingError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_length,
            });
        }
        dst.reserve(HEADER_LEN + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), FramingError> {
        <Self as Encoder<&Envelope>>::encode(self, &item, dst)
    }
}

/// Read exactly one envelope. `Ok(None)` means the peer closed cleanly
/// between frames.
pub async fn read_envelope<R>(
    reader: &mut R,
    max_frame_length: usize,
) -> Result<Option<Envelope>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FramingError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_length {
        return Err(FramingError::FrameTooLarge {
            len,
            max: max_frame_length,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::Truncated
        } else {
            FramingError::Io(e)
        }
    })?;
    parse_body(&body).map(Some)
}

/// Encode and write one envelope, then flush.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    EnvelopeCodec::default().encode(envelope, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
