use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LenType, MAX_FRAME_LEN, Serialize};

/// Writes length prefixed frames.
pub struct FrameSender<W: AsyncWrite + Unpin> {
    tx: W,
    body: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            body: Vec::new(),
        }
    }

    /// Encodes `msg` and writes it as one frame, flushing afterwards.
    ///
    /// # Returns
    /// An `InvalidInput` error if the encoded message is larger than a peer would accept,
    /// nothing is written in that case.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.body.clear();
        let tail = msg.serialize(&mut self.body).unwrap_or_default();

        let len = self.body.len() + tail.len();
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        self.tx.write_all(&(len as LenType).to_be_bytes()).await?;
        self.tx.write_all(&self.body).await?;
        if !tail.is_empty() {
            self.tx.write_all(tail).await?;
        }

        self.tx.flush().await
    }

    /// Shuts down the write half, the peer observes end of stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
