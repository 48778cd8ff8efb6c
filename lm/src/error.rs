use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

/// The language model module's error type.
#[derive(Debug)]
pub enum LmErr {
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    RowOutOfBounds {
        index: usize,
        vocab: usize,
    },
    /// The noise distribution has no mass to sample from.
    DegenerateNoise,
    /// An evaluation stream produced no tokens; perplexity is undefined.
    EmptyStream,
    CorpusIo {
        path: PathBuf,
        source: io::Error,
    },
    MalformedVocabLine {
        path: PathBuf,
        line: usize,
    },
    UnknownTensor {
        name: String,
    },
}

impl Display for LmErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LmErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch in {what}: got {got}, expected {expected}"),
            LmErr::RowOutOfBounds { index, vocab } => {
                write!(f, "row index {index} out of bounds for vocabulary of {vocab}")
            }
            LmErr::DegenerateNoise => {
                write!(f, "noise distribution has no sampling mass (empty or all-zero counts)")
            }
            LmErr::EmptyStream => {
                write!(f, "evaluation stream is empty, perplexity is undefined")
            }
            LmErr::CorpusIo { path, source } => {
                write!(f, "failed to read corpus file {}: {source}", path.display())
            }
            LmErr::MalformedVocabLine { path, line } => write!(
                f,
                "malformed vocabulary entry at {}:{line}, expected `token count`",
                path.display()
            ),
            LmErr::UnknownTensor { name } => write!(f, "model has no tensor named {name}"),
        }
    }
}

impl Error for LmErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LmErr::CorpusIo { source, .. } => Some(source),
            _ => None,
        }
    }
}
