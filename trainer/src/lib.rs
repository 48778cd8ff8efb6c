//! The distributed training-loop orchestrator.
//!
//! Drives the per-step control logic around an [`lm::NceModel`]: sparse
//! index-addressed updates to the embedding table, dense-parameter
//! averaging across the worker group on a fixed cadence, best-checkpoint
//! selection by held-out perplexity, and learning-rate annealing on
//! stagnation.

pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod epoch;
mod error;
pub mod eval;
pub mod metrics;
pub mod optim;
pub mod schedule;
pub mod sparse;
pub mod state;
pub mod sync;

pub use cancel::CancelToken;
pub use config::TrainConfig;
pub use controller::TrainingController;
pub use epoch::{EpochReport, EpochRunner};
pub use error::TrainErr;
pub use eval::evaluate;
pub use metrics::TrainMetrics;
pub use schedule::SyncSchedule;
pub use state::{Selection, TrainingState};

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;
