use std::{error::Error, fmt, io};

/// Collective group runtime failures.
///
/// A member that never reaches a reduction call does not surface here: per
/// the group contract that is an indefinite stall, not an error. These
/// variants cover the failures that are detectable.
#[derive(Debug)]
pub enum CollectiveErr {
    Io(io::Error),
    /// Two members announced the same rank.
    RankConflict {
        rank: usize,
    },
    /// A member joined with a different world size than the coordinator's.
    WorldSizeMismatch {
        got: usize,
        expected: usize,
    },
    /// A member contributed a tensor of the wrong length for this round.
    TensorLenMismatch {
        round: u64,
        got: usize,
        expected: usize,
    },
    /// A member disconnected while others were still contributing.
    Desync {
        round: u64,
        rank: usize,
    },
    UnexpectedMessage {
        got: &'static str,
    },
    /// The remote side reported a protocol error.
    Remote {
        detail: String,
    },
}

impl fmt::Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveErr::Io(e) => write!(f, "io error: {e}"),
            CollectiveErr::RankConflict { rank } => {
                write!(f, "rank {rank} joined the group twice")
            }
            CollectiveErr::WorldSizeMismatch { got, expected } => {
                write!(f, "member joined with world size {got}, group expects {expected}")
            }
            CollectiveErr::TensorLenMismatch {
                round,
                got,
                expected,
            } => write!(
                f,
                "tensor length mismatch at round {round}: got {got}, expected {expected}"
            ),
            CollectiveErr::Desync { round, rank } => write!(
                f,
                "rank {rank} left the group mid-round at round {round}"
            ),
            CollectiveErr::UnexpectedMessage { got } => {
                write!(f, "unexpected message: got {got}")
            }
            CollectiveErr::Remote { detail } => write!(f, "remote error: {detail}"),
        }
    }
}

impl Error for CollectiveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectiveErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectiveErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CollectiveErr> for io::Error {
    fn from(value: CollectiveErr) -> Self {
        match value {
            CollectiveErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
