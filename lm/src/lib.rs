//! Model-side building blocks for the NCE language model trainer: the
//! embedding table and its sparse gradient buffer, the unigram noise
//! distribution, corpus loading, and the recurrent model itself.

pub mod corpus;
pub mod embedding;
mod error;
pub mod grad;
mod mode;
pub mod model;
pub mod noise;
pub mod rnn;

pub use corpus::{Batch, Corpus, Vocab, batchify};
pub use embedding::EmbeddingTable;
pub use error::LmErr;
pub use grad::GradientBuffer;
pub use mode::Mode;
pub use model::NceModel;
pub use noise::NoiseDistribution;
pub use rnn::{RnnConfig, RnnLm};

/// The language model module's result type.
pub type Result<T> = std::result::Result<T, LmErr>;
