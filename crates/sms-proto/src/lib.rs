use std::io::{Read, Write};

use thiserror::Error;
#[cfg(feature = "tokio")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub mod model;

pub use model::{Ack, Msg, Sms, Tag, md5_hex_upper};

pub const MAGIC: [u8; 4] = *b"SMSF";

/// Frames larger than this are treated as stream corruption. A single SMS
/// envelope is a few hundred bytes; anything near the cap means the length
/// prefix was garbage.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024;

const KIND_DATA: u8 = 1;
const KIND_HEARTBEAT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Heartbeat,
}

impl FrameKind {
    fn raw(self) -> u8 {
        match self {
            FrameKind::Data => KIND_DATA,
            FrameKind::Heartbeat => KIND_HEARTBEAT,
        }
    }

    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            KIND_DATA => Some(FrameKind::Data),
            KIND_HEARTBEAT => Some(FrameKind::Heartbeat),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid frame magic")]
    InvalidMagic,
    #[error("unknown frame kind: {0}")]
    UnknownKind(u8),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn write_frame_sync<W: Write>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<(), ProtoError> {
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| ProtoError::PayloadTooLarge(u32::MAX))?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtoError::PayloadTooLarge(payload_len));
    }

    writer.write_all(&MAGIC)?;
    writer.write_all(&[kind.raw()])?;
    writer.write_all(&payload_len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

pub fn read_frame_sync<R: Read>(
    reader: &mut R
) -> Result<(FrameKind, Vec<u8>), ProtoError> {
    let mut magic = [0_u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(ProtoError::InvalidMagic);
    }

    let mut kind_buf = [0_u8; 1];
    reader.read_exact(&mut kind_buf)?;
    let kind = FrameKind::from_raw(kind_buf[0])
        .ok_or(ProtoError::UnknownKind(kind_buf[0]))?;

    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf)?;
    let payload_len = u32::from_be_bytes(len_buf);
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtoError::PayloadTooLarge(payload_len));
    }

    let mut payload = vec![0_u8; payload_len as usize];
    reader.read_exact(&mut payload)?;

    Ok((kind, payload))
}

#[cfg(feature = "tokio")]
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<(), ProtoError> {
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| ProtoError::PayloadTooLarge(u32::MAX))?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtoError::PayloadTooLarge(payload_len));
    }

    writer.write_all(&MAGIC).await?;
    writer.write_all(&[kind.raw()]).await?;
    writer.write_all(&payload_len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(feature = "tokio")]
pub async fn read_frame_async<R: AsyncRead + Unpin>(
    reader: &mut R
) -> Result<(FrameKind, Vec<u8>), ProtoError> {
    let mut magic = [0_u8; 4];
    reader.read_exact(&mut magic).await?;
    if magic != MAGIC {
        return Err(ProtoError::InvalidMagic);
    }

    let mut kind_buf = [0_u8; 1];
    reader.read_exact(&mut kind_buf).await?;
    let kind = FrameKind::from_raw(kind_buf[0])
        .ok_or(ProtoError::UnknownKind(kind_buf[0]))?;

    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let payload_len = u32::from_be_bytes(len_buf);
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtoError::PayloadTooLarge(payload_len));
    }

    let mut payload = vec![0_u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;

    Ok((kind, payload))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{
        FrameKind, MAGIC, ProtoError, read_frame_sync, write_frame_sync,
    };

    #[test]
    fn frame_roundtrip_data() {
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, FrameKind::Data, b"{\"tag\":2}")
            .expect("write");

        assert_eq!(&buf[..4], MAGIC.as_slice());

        let mut cursor = Cursor::new(buf);
        let (kind, payload) = read_frame_sync(&mut cursor).expect("read");
        assert_eq!(kind, FrameKind::Data);
        assert_eq!(payload, b"{\"tag\":2}");
    }

    #[test]
    fn frame_roundtrip_heartbeat_is_empty() {
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, FrameKind::Heartbeat, b"").expect("write");

        let mut cursor = Cursor::new(buf);
        let (kind, payload) = read_frame_sync(&mut cursor).expect("read");
        assert_eq!(kind, FrameKind::Heartbeat);
        assert!(payload.is_empty());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, FrameKind::Data, b"x").expect("write");
        buf[0] = b'X';

        let mut cursor = Cursor::new(buf);
        match read_frame_sync(&mut cursor) {
            Err(ProtoError::InvalidMagic) => {}
            other => panic!("expected InvalidMagic, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, FrameKind::Data, b"x").expect("write");
        buf[4] = 9;

        let mut cursor = Cursor::new(buf);
        match read_frame_sync(&mut cursor) {
            Err(ProtoError::UnknownKind(9)) => {}
            other => panic!("expected UnknownKind, got {other:?}"),
        }
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, FrameKind::Data, b"x").expect("write");
        buf[5..9].copy_from_slice(&u32::MAX.to_be_bytes());

        let mut cursor = Cursor::new(buf);
        match read_frame_sync(&mut cursor) {
            Err(ProtoError::PayloadTooLarge(_)) => {}
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
    }
}
