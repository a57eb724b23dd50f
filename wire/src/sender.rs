//! The sending half of a framed stream channel.

use std::io;

use log::warn;
use serde::Serialize as SerdeSerialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LenType, MAX_FRAME_LEN, Serializer};

/// The sending end handle of a framed connection.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    serializer: Serializer,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W, serializer: Serializer) -> Self {
        Self { tx, serializer }
    }

    /// Serializes `msg` and writes it as one length-prefixed frame.
    pub async fn send<T: SerdeSerialize>(&mut self, msg: &T) -> io::Result<()> {
        let body = self.serializer.encode(msg)?;
        self.write_frame(&body).await
    }

    /// Writes an opaque byte payload as one frame, bypassing the serializer.
    ///
    /// Used for blobs the core moves around without interpreting, such as
    /// model definitions.
    pub async fn send_bytes(&mut self, body: &[u8]) -> io::Result<()> {
        self.write_frame(body).await
    }

    async fn write_frame(&mut self, body: &[u8]) -> io::Result<()> {
        if body.len() > MAX_FRAME_LEN {
            warn!("refusing to send a frame of {} bytes, over the cap", body.len());
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame body of {} bytes exceeds the cap", body.len()),
            ));
        }

        let header = (body.len() as LenType).to_be_bytes();
        // One write for header plus body: split across two writes, the body
        // can stall behind Nagle waiting on the peer's delayed ACK.
        let mut frame = Vec::with_capacity(header.len() + body.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(body);
        self.tx.write_all(&frame).await?;
        self.tx.flush().await
    }
}
