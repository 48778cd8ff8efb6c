//! The application layer messages exchanged with the coordinator.

use std::{borrow::Cow, io};

type Kind = u32;
const KIND_SIZE: usize = size_of::<Kind>();

const KIND_ERR: Kind = 0;
const KIND_CONTROL: Kind = 1;
const KIND_TENSOR: Kind = 2;

/// Group membership control commands, JSON-encoded on the wire.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Announces a member to the coordinator.
    Join { rank: usize, world_size: usize },
    /// Acknowledges a completed rendezvous.
    Welcome { world_size: usize },
    /// Leaves the group at a round boundary.
    Disconnect,
}

/// A single framed message.
///
/// Tensor payloads are raw little-endian `f32` words and are written
/// without copying into an intermediate buffer.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Tensor(&'a [f32]),
    Err(Cow<'a, str>),
}

impl<'a> Msg<'a> {
    /// Serializes the message header and inline body into `buf`, returning
    /// the tensor payload (if any) to be written after it.
    pub(crate) fn encode(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [f32]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&KIND_ERR.to_be_bytes());
                buf.extend_from_slice(e.as_bytes());
                Ok(None)
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&KIND_CONTROL.to_be_bytes());
                serde_json::to_writer(&mut *buf, cmd).map_err(io::Error::other)?;
                Ok(None)
            }
            Msg::Tensor(nums) => {
                buf.extend_from_slice(&KIND_TENSOR.to_be_bytes());
                Ok(Some(nums))
            }
        }
    }

    /// Decodes one frame body. `buf` must start at the kind header and be
    /// 4-byte aligned so tensor payloads can be viewed in place.
    pub(crate) fn decode(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < KIND_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes is too short", buf.len()),
            ));
        }

        let (kind_buf, rest) = buf.split_at(KIND_SIZE);
        let kind = Kind::from_be_bytes(kind_buf.try_into().expect("KIND_SIZE bytes"));

        match kind {
            KIND_ERR => {
                let detail = str::from_utf8(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Msg::Err(Cow::Borrowed(detail)))
            }
            KIND_CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Msg::Control(cmd))
            }
            KIND_TENSOR => {
                let nums = bytemuck::try_cast_slice(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                Ok(Msg::Tensor(nums))
            }
            byte => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("received an invalid kind header {byte}"),
            )),
        }
    }

    /// A short human-readable tag for logging and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Welcome { .. }) => "control/welcome",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Tensor(_) => "tensor",
            Msg::Err(_) => "err",
        }
    }
}
