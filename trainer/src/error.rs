use std::{error::Error, fmt, io, path::PathBuf};

use collective::CollectiveErr;
use lm::LmErr;

/// Trainer runtime failures.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Lm(LmErr),
    Collective(CollectiveErr),
    /// The touched index list and the gradient rows disagree in length.
    GradientArityMismatch {
        indices: usize,
        values: usize,
        dim: usize,
    },
    /// The evaluation stream yielded no tokens; perplexity is undefined.
    EmptyEvalStream,
    InvalidConfig(String),
    CheckpointIo {
        path: PathBuf,
        source: io::Error,
    },
    CheckpointFormat {
        path: PathBuf,
        source: safetensors::SafeTensorError,
    },
    CheckpointTensor {
        path: PathBuf,
        name: String,
        detail: String,
    },
    CheckpointMetadata {
        path: PathBuf,
        key: &'static str,
    },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Lm(e) => write!(f, "model error: {e}"),
            TrainErr::Collective(e) => write!(f, "collective error: {e}"),
            TrainErr::GradientArityMismatch {
                indices,
                values,
                dim,
            } => write!(
                f,
                "sparse update arity mismatch: {indices} touched indices but {values} gradient \
                 values for rows of width {dim}"
            ),
            TrainErr::EmptyEvalStream => {
                write!(f, "evaluation stream is empty, perplexity is undefined")
            }
            TrainErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainErr::CheckpointIo { path, source } => {
                write!(f, "checkpoint io failure at {}: {source}", path.display())
            }
            TrainErr::CheckpointFormat { path, source } => {
                write!(f, "malformed checkpoint at {}: {source}", path.display())
            }
            TrainErr::CheckpointTensor { path, name, detail } => write!(
                f,
                "bad tensor {name} in checkpoint {}: {detail}",
                path.display()
            ),
            TrainErr::CheckpointMetadata { path, key } => write!(
                f,
                "checkpoint {} is missing or corrupts metadata key {key}",
                path.display()
            ),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Io(e) => Some(e),
            TrainErr::Lm(e) => Some(e),
            TrainErr::Collective(e) => Some(e),
            TrainErr::CheckpointIo { source, .. } => Some(source),
            TrainErr::CheckpointFormat { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<LmErr> for TrainErr {
    fn from(value: LmErr) -> Self {
        Self::Lm(value)
    }
}

impl From<CollectiveErr> for TrainErr {
    fn from(value: CollectiveErr) -> Self {
        Self::Collective(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
