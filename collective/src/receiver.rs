//! The receiving end of the framed message channel.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{LEN_TYPE_SIZE, LenType, msg::Msg};

/// The receiving end handle of the communication.
///
/// Frames are read into a persistent `f32`-aligned scratch buffer so that
/// tensor payloads can be handed out as `&[f32]` views without copying.
#[derive(Debug)]
pub struct Receiver<R: AsyncRead + Unpin> {
    rx: R,
    scratch: Vec<f32>,
}

impl<R: AsyncRead + Unpin> Receiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            scratch: Vec::new(),
        }
    }

    /// Waits for the next message.
    ///
    /// The returned message borrows the receiver's scratch buffer and must
    /// be consumed before the next `recv` call.
    ///
    /// # Returns
    /// The decoded message, or `io::Error` on transport or framing failure.
    pub async fn recv(&mut self) -> io::Result<Msg<'_>> {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;
        let len = LenType::from_be_bytes(len_buf) as usize;

        let words = len.div_ceil(size_of::<f32>());
        self.scratch.clear();
        self.scratch.resize(words, 0.0);

        {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(self.scratch.as_mut_slice());
            self.rx.read_exact(&mut bytes[..len]).await?;
        }

        let bytes: &[u8] = bytemuck::cast_slice(self.scratch.as_slice());
        Msg::decode(&bytes[..len])
    }
}
