//! The sending end of the framed message channel.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, msg::Msg};

/// The sending end handle of the communication.
#[derive(Debug)]
pub struct Sender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> Sender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends one framed message. Tensor payloads are written directly from
    /// the caller's slice, after the header and kind bytes.
    ///
    /// # Arguments
    /// * `msg` - The message to frame and send.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send(&mut self, msg: &Msg<'_>) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let payload = msg.encode(buf)?;
        let payload_bytes: &[u8] = payload.map(bytemuck::cast_slice).unwrap_or_default();

        let len = buf.len() - LEN_TYPE_SIZE + payload_bytes.len();
        let header = (len as LenType).to_be_bytes();
        buf[..header.len()].copy_from_slice(&header);

        tx.write_all(buf).await?;
        if !payload_bytes.is_empty() {
            tx.write_all(payload_bytes).await?;
        }

        tx.flush().await
    }
}
