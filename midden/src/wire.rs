//! the framed binary protocol: a fixed 8 byte header (magic, kind, retries,
//! payload size) followed by an opaque payload

use std::io;

use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAGIC;

/// bytes in the fixed part of a frame (magic + kind + retries + payload size)
pub const HEADER_SIZE: usize = 8;

/// kind byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum MessageKind {
    /// client -> broker: enqueue this item. broker -> client: a delivery
    Send = 0x5e,
    /// client -> broker: ready for one item from the main queue
    Receive = 0xec,
    /// client -> broker: done with the held delivery
    Confirm = 0xc0,
    /// client -> broker: ready for one item from the dead letter queue
    DeadReceive = 0xde,
    /// broker -> client: the receive was refused
    NoReceive = 0x0e,
    /// any other kind byte. kept verbatim so re-encoding is lossless
    #[num_enum(catch_all)]
    Other(u8),
}

#[derive(Debug, Error)]
pub enum WireError {
    /// the peer went away cleanly between frames
    #[error("connection closed")]
    Closed,
    /// the magic check failed. the stream cannot be resynced after this
    #[error("magic value check failed (got {0:#04x} {1:#04x})")]
    BadMagic(u8, u8),
    /// the stream ended in the middle of a frame
    #[error("frame truncated while reading its {0}")]
    Truncated(&'static str),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// one frame of the protocol.
///
/// `retries` and `payload` only carry meaning on [`MessageKind::Send`]
/// frames; the broker, not the codec, is what interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub retries: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn send(payload: Vec<u8>, retries: u8) -> Self {
        Self {
            kind: MessageKind::Send,
            retries,
            payload,
        }
    }

    pub fn receive() -> Self {
        Self::control(MessageKind::Receive)
    }

    pub fn confirm() -> Self {
        Self::control(MessageKind::Confirm)
    }

    pub fn dead_receive() -> Self {
        Self::control(MessageKind::DeadReceive)
    }

    pub fn no_receive() -> Self {
        Self::control(MessageKind::NoReceive)
    }

    fn control(kind: MessageKind) -> Self {
        Self {
            kind,
            retries: 0,
            payload: vec![],
        }
    }

    /// the full wire form, always exactly `HEADER_SIZE + payload.len()` bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(self.kind.into());
        buf.push(self.retries);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }
}

/// read exactly one frame.
///
/// a clean close at a frame boundary is [`WireError::Closed`]; everything
/// else that cuts a frame short is [`WireError::Truncated`]. a failed magic
/// check is fatal for the stream, there is no way to find the next frame
/// boundary again.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, WireError> {
    let mut magic = [0u8; 2];
    if reader.read(&mut magic[..1]).await? == 0 {
        return Err(WireError::Closed);
    }
    reader
        .read_exact(&mut magic[1..])
        .await
        .map_err(short_read("magic value"))?;
    if magic != MAGIC {
        return Err(WireError::BadMagic(magic[0], magic[1]));
    }

    let kind = MessageKind::from(reader.read_u8().await.map_err(short_read("kind"))?);
    let retries = reader.read_u8().await.map_err(short_read("retries"))?;
    let payload_size = reader
        .read_u32()
        .await
        .map_err(short_read("payload size"))?;
    let mut payload = vec![0u8; payload_size as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(short_read("payload"))?;

    Ok(Message {
        kind,
        retries,
        payload,
    })
}

fn short_read(field: &'static str) -> impl FnOnce(io::Error) -> WireError {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => WireError::Truncated(field),
        _ => WireError::Io(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn decode(bytes: &[u8]) -> Result<Message, WireError> {
        read_message(&mut &bytes[..]).await
    }

    #[tokio::test]
    async fn round_trip() {
        let msg = Message::send(b"hello".to_vec(), 3);
        let bytes = msg.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        assert_eq!(&bytes[..2], &MAGIC);
        assert_eq!(decode(&bytes).await.unwrap(), msg);
    }

    #[tokio::test]
    async fn round_trip_empty_payload() {
        for msg in [
            Message::receive(),
            Message::confirm(),
            Message::dead_receive(),
            Message::no_receive(),
            Message::send(vec![], 0),
        ] {
            let bytes = msg.encode();
            assert_eq!(bytes.len(), HEADER_SIZE);
            assert_eq!(decode(&bytes).await.unwrap(), msg);
        }
    }

    #[tokio::test]
    async fn retry_sentinel_survives() {
        let msg = Message::send(b"forever".to_vec(), crate::RETRY_FOREVER);
        assert_eq!(decode(&msg.encode()).await.unwrap().retries, 255);
    }

    #[tokio::test]
    async fn unknown_kind_byte_is_preserved() {
        let mut bytes = Message::receive().encode();
        bytes[2] = 0xab;
        let msg = decode(&bytes).await.unwrap();
        assert_eq!(msg.kind, MessageKind::Other(0xab));
        // re-encoding gives back the original byte, not some canonical junk value
        assert_eq!(msg.encode(), bytes);
    }

    #[tokio::test]
    async fn clean_close_between_frames() {
        assert!(matches!(decode(&[]).await, Err(WireError::Closed)));
    }

    #[tokio::test]
    async fn bad_magic_is_fatal() {
        assert!(matches!(
            decode(&[0x00, 0x00]).await,
            Err(WireError::BadMagic(0x00, 0x00))
        ));
        // a correct first byte does not save a wrong second one
        assert!(matches!(
            decode(&[0x55, 0x00]).await,
            Err(WireError::BadMagic(0x55, 0x00))
        ));
    }

    #[tokio::test]
    async fn truncated_frames() {
        // lone magic byte
        assert!(matches!(
            decode(&[0x55]).await,
            Err(WireError::Truncated(_))
        ));
        // header cut off after the kind byte
        let bytes = Message::receive().encode();
        assert!(matches!(
            decode(&bytes[..3]).await,
            Err(WireError::Truncated(_))
        ));
        // payload shorter than the advertised size
        let bytes = Message::send(b"full payload".to_vec(), 1).encode();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 4]).await,
            Err(WireError::Truncated("payload"))
        ));
    }
}
