use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
#[cfg(feature = "tokio")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAGIC: [u8; 4] = *b"OBLG";
pub const REPLY_CONTINUE: &[u8; 3] = b"OK\n";
pub const REPLY_STOP: &[u8; 3] = b"ST\n";

/// Host lifecycle point a frame was emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    QueueOutbound,
    Delivered,
    Deferred,
    Bounce,
    Heartbeat,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueOutbound => "queue_outbound",
            Self::Delivered => "delivered",
            Self::Deferred => "deferred",
            Self::Bounce => "bounce",
            Self::Heartbeat => "heartbeat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queue_outbound" => Some(Self::QueueOutbound),
            "delivered" => Some(Self::Delivered),
            "deferred" => Some(Self::Deferred),
            "bounce" | "bounced" => Some(Self::Bounce),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub hook: Hook,
    #[serde(default)]
    pub source: Option<String>,
}

/// Continuation signal returned to the host after every hook frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Carry on with the host's normal processing.
    Continue,
    /// The bounce was handled; the host must not notify the sender.
    StopBounce,
}

impl Verdict {
    pub fn as_bytes(&self) -> &'static [u8; 3] {
        match self {
            Self::Continue => REPLY_CONTINUE,
            Self::StopBounce => REPLY_STOP,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::StopBounce => "stop",
        }
    }

    fn from_reply(reply: &[u8; 3]) -> Result<Self, ProtoError> {
        if reply == REPLY_CONTINUE {
            Ok(Self::Continue)
        } else if reply == REPLY_STOP {
            Ok(Self::StopBounce)
        } else {
            Err(ProtoError::InvalidReply)
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid frame magic")]
    InvalidMagic,
    #[error("invalid verdict reply")]
    InvalidReply,
    #[error("header too large: {0} bytes")]
    HeaderTooLarge(u32),
    #[error("body too large: {0} bytes")]
    BodyTooLarge(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("header encode error: {0}")]
    HeaderEncode(String),
    #[error("header decode error: {0}")]
    HeaderDecode(String),
}

pub fn encode_header_json(header: &Header) -> Result<Vec<u8>, ProtoError> {
    serde_json::to_vec(header)
        .map_err(|err| ProtoError::HeaderEncode(err.to_string()))
}

pub fn decode_header_json(bytes: &[u8]) -> Result<Header, ProtoError> {
    serde_json::from_slice(bytes)
        .map_err(|err| ProtoError::HeaderDecode(err.to_string()))
}

fn frame_prefix(
    header: &[u8],
    body: &[u8],
) -> Result<[u8; 16], ProtoError> {
    let header_len = u32::try_from(header.len())
        .map_err(|_| ProtoError::HeaderTooLarge(u32::MAX))?;
    let body_len = u64::try_from(body.len())
        .map_err(|_| ProtoError::BodyTooLarge(u64::MAX))?;

    let mut prefix = [0_u8; 16];
    prefix[..4].copy_from_slice(&MAGIC);
    prefix[4..8].copy_from_slice(&header_len.to_be_bytes());
    prefix[8..].copy_from_slice(&body_len.to_be_bytes());
    Ok(prefix)
}

fn check_prefix(
    prefix: &[u8; 16],
    max_header_len: u32,
    max_body_len: u64,
) -> Result<(usize, usize), ProtoError> {
    if prefix[..4] != MAGIC {
        return Err(ProtoError::InvalidMagic);
    }

    let mut header_len_buf = [0_u8; 4];
    header_len_buf.copy_from_slice(&prefix[4..8]);
    let header_len = u32::from_be_bytes(header_len_buf);
    if header_len > max_header_len {
        return Err(ProtoError::HeaderTooLarge(header_len));
    }

    let mut body_len_buf = [0_u8; 8];
    body_len_buf.copy_from_slice(&prefix[8..]);
    let body_len = u64::from_be_bytes(body_len_buf);
    if body_len > max_body_len {
        return Err(ProtoError::BodyTooLarge(body_len));
    }

    Ok((header_len as usize, body_len as usize))
}

pub fn write_frame_sync<W: Write>(
    writer: &mut W,
    header: &[u8],
    body: &[u8],
) -> Result<(), ProtoError> {
    writer.write_all(&frame_prefix(header, body)?)?;
    writer.write_all(header)?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

#[cfg(feature = "tokio")]
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &[u8],
    body: &[u8],
) -> Result<(), ProtoError> {
    writer.write_all(&frame_prefix(header, body)?).await?;
    writer.write_all(header).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

pub fn read_frame_sync<R: Read>(
    reader: &mut R,
    max_header_len: u32,
    max_body_len: u64,
) -> Result<(Vec<u8>, Vec<u8>), ProtoError> {
    let mut prefix = [0_u8; 16];
    reader.read_exact(&mut prefix)?;
    let (header_len, body_len) =
        check_prefix(&prefix, max_header_len, max_body_len)?;

    let mut header = vec![0_u8; header_len];
    reader.read_exact(&mut header)?;

    let mut body = vec![0_u8; body_len];
    reader.read_exact(&mut body)?;

    Ok((header, body))
}

#[cfg(feature = "tokio")]
pub async fn read_frame_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_header_len: u32,
    max_body_len: u64,
) -> Result<(Vec<u8>, Vec<u8>), ProtoError> {
    let mut prefix = [0_u8; 16];
    reader.read_exact(&mut prefix).await?;
    let (header_len, body_len) =
        check_prefix(&prefix, max_header_len, max_body_len)?;

    let mut header = vec![0_u8; header_len];
    reader.read_exact(&mut header).await?;

    let mut body = vec![0_u8; body_len];
    reader.read_exact(&mut body).await?;

    Ok((header, body))
}

pub fn read_verdict_sync<R: Read>(reader: &mut R) -> Result<Verdict, ProtoError> {
    let mut reply = [0_u8; 3];
    reader.read_exact(&mut reply)?;
    Verdict::from_reply(&reply)
}

#[cfg(feature = "tokio")]
pub async fn read_verdict_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Verdict, ProtoError> {
    let mut reply = [0_u8; 3];
    reader.read_exact(&mut reply).await?;
    Verdict::from_reply(&reply)
}

#[cfg(feature = "tokio")]
pub async fn write_verdict_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    verdict: Verdict,
) -> Result<(), ProtoError> {
    writer.write_all(verdict.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn frame_round_trips_through_sync_codec() {
        let header = encode_header_json(&Header {
            hook: Hook::QueueOutbound,
            source: Some("mx-out-1".to_string()),
        })
        .expect("header encodes");
        let body = br#"{"job_id":"J1"}"#;

        let mut wire = Vec::new();
        write_frame_sync(&mut wire, &header, body).expect("frame writes");
        assert_eq!(&wire[..4], &MAGIC);

        let (header_bytes, body_bytes) =
            read_frame_sync(&mut Cursor::new(wire), 1024, 1024)
                .expect("frame reads");
        let decoded = decode_header_json(&header_bytes).expect("header decodes");
        assert_eq!(decoded.hook, Hook::QueueOutbound);
        assert_eq!(decoded.source.as_deref(), Some("mx-out-1"));
        assert_eq!(body_bytes, body);
    }

    #[test]
    fn oversized_body_is_rejected_before_reading_it() {
        let mut wire = Vec::new();
        write_frame_sync(&mut wire, b"{}", &[b'x'; 64]).expect("frame writes");

        let err = read_frame_sync(&mut Cursor::new(wire), 1024, 16)
            .expect_err("body limit must apply");
        assert!(matches!(err, ProtoError::BodyTooLarge(64)));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut wire = b"BNCE".to_vec();
        wire.extend_from_slice(&[0_u8; 12]);
        let err = read_frame_sync(&mut Cursor::new(wire), 1024, 1024)
            .expect_err("magic must match");
        assert!(matches!(err, ProtoError::InvalidMagic));
    }

    #[test]
    fn verdict_replies_decode() {
        let mut stop = Cursor::new(REPLY_STOP.to_vec());
        assert_eq!(read_verdict_sync(&mut stop).unwrap(), Verdict::StopBounce);

        let mut cont = Cursor::new(REPLY_CONTINUE.to_vec());
        assert_eq!(read_verdict_sync(&mut cont).unwrap(), Verdict::Continue);

        let mut junk = Cursor::new(b"NO\n".to_vec());
        assert!(matches!(
            read_verdict_sync(&mut junk),
            Err(ProtoError::InvalidReply)
        ));
    }

    #[test]
    fn hook_names_match_wire_names() {
        for hook in [
            Hook::QueueOutbound,
            Hook::Delivered,
            Hook::Deferred,
            Hook::Bounce,
            Hook::Heartbeat,
        ] {
            assert_eq!(Hook::parse(hook.as_str()), Some(hook));
            let encoded = serde_json::to_string(&hook).unwrap();
            assert_eq!(encoded, format!("\"{}\"", hook.as_str()));
        }
        assert_eq!(Hook::parse("bounced"), Some(Hook::Bounce));
        assert_eq!(Hook::parse("rcpt"), None);
    }
}
