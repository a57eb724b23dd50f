//! The receiving half of a framed stream channel.

use std::io;

use log::warn;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serializer};

/// The receiving end handle of a framed connection.
pub struct FrameReceiver<R>
where
    R: AsyncRead + Unpin,
{
    rx: R,
    buf: Vec<u8>,
    serializer: Serializer,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R, serializer: Serializer) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            serializer,
        }
    }

    /// Waits for the next frame and decodes it into a `T`.
    ///
    /// A frame that does not decode as `T` consumes the frame and returns
    /// `InvalidData`; the stream itself stays aligned on frame boundaries,
    /// so callers may keep reading.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> io::Result<T> {
        let len = self.read_frame().await?;
        self.serializer.decode(&self.buf[..len])
    }

    /// Waits for the next frame and returns its raw body.
    pub async fn recv_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_frame().await?;
        Ok(self.buf[..len].to_vec())
    }

    async fn read_frame(&mut self) -> io::Result<usize> {
        let mut header = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut header).await?;
        let len = LenType::from_be_bytes(header) as usize;

        if len > MAX_FRAME_LEN {
            warn!("peer announced a frame of {len} bytes, over the cap");
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer announced a frame of {len} bytes, over the cap"),
            ));
        }

        self.buf.resize(len, 0);
        self.rx.read_exact(&mut self.buf).await?;
        Ok(len)
    }
}
