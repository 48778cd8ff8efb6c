//! Model snapshots on disk.
//!
//! A checkpoint is one safetensors file holding every model tensor plus
//! the run state (epoch, learning rate, best perplexity) in the header
//! metadata. Writes go through a temporary file and a rename so a crash
//! mid-write never leaves a truncated checkpoint under the final name.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use lm::NceModel;
use log::info;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{Result, TrainErr, TrainingState};

const KEY_EPOCH: &str = "epoch";
const KEY_LR: &str = "lr";
const KEY_BEST_PPL: &str = "best_val_ppl";
const KEY_BEST_PATH: &str = "best_path";

/// Writes `model` and `state` to `path` atomically.
///
/// # Errors
/// Returns `TrainErr::CheckpointIo` on filesystem failures and
/// `TrainErr::CheckpointFormat` if serialization itself fails.
pub fn save<M: NceModel>(path: &Path, model: &M, state: &TrainingState) -> Result<()> {
    let tensors = model.tensors();
    let mut views = Vec::with_capacity(tensors.len());
    for (name, shape, data) in &tensors {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(data))
            .map_err(|source| TrainErr::CheckpointFormat {
                path: path.to_path_buf(),
                source,
            })?;
        views.push((*name, view));
    }

    let mut metadata = HashMap::new();
    metadata.insert(KEY_EPOCH.to_string(), state.epoch.to_string());
    metadata.insert(KEY_LR.to_string(), state.lr.to_string());
    if let Some(best) = state.best_val_ppl {
        metadata.insert(KEY_BEST_PPL.to_string(), best.to_string());
    }
    if let Some(best_path) = &state.best_path {
        metadata.insert(KEY_BEST_PATH.to_string(), best_path.display().to_string());
    }

    let bytes = safetensors::serialize(views, &Some(metadata)).map_err(|source| {
        TrainErr::CheckpointFormat {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let tmp = tmp_path(path);
    fs::write(&tmp, &bytes).map_err(|source| TrainErr::CheckpointIo {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| TrainErr::CheckpointIo {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = path.display().to_string(), bytes = bytes.len(); "checkpoint written");
    Ok(())
}

/// Restores every tensor in the file into `model` and returns the stored
/// run state.
///
/// # Errors
/// Returns `TrainErr::CheckpointIo` when the file cannot be read,
/// `TrainErr::CheckpointFormat` on a malformed file, and
/// `TrainErr::CheckpointTensor` / `TrainErr::CheckpointMetadata` when the
/// contents disagree with the model.
pub fn load<M: NceModel>(path: &Path, model: &mut M) -> Result<TrainingState> {
    let buffer = fs::read(path).map_err(|source| TrainErr::CheckpointIo {
        path: path.to_path_buf(),
        source,
    })?;

    let stored = SafeTensors::deserialize(&buffer).map_err(|source| TrainErr::CheckpointFormat {
        path: path.to_path_buf(),
        source,
    })?;

    for (name, view) in stored.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(TrainErr::CheckpointTensor {
                path: path.to_path_buf(),
                name,
                detail: format!("expected f32 data, found {:?}", view.dtype()),
            });
        }

        // The tensor bytes sit behind a JSON header, so alignment is not
        // guaranteed; collect into an owned, aligned buffer.
        let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        model
            .load_tensor(&name, view.shape(), &data)
            .map_err(|e| TrainErr::CheckpointTensor {
                path: path.to_path_buf(),
                name,
                detail: e.to_string(),
            })?;
    }

    let (_, header) =
        SafeTensors::read_metadata(&buffer).map_err(|source| TrainErr::CheckpointFormat {
            path: path.to_path_buf(),
            source,
        })?;
    let metadata = header
        .metadata()
        .as_ref()
        .ok_or_else(|| TrainErr::CheckpointMetadata {
            path: path.to_path_buf(),
            key: KEY_EPOCH,
        })?;

    let state = TrainingState {
        epoch: required(metadata, path, KEY_EPOCH)?,
        lr: required(metadata, path, KEY_LR)?,
        best_val_ppl: optional(metadata, path, KEY_BEST_PPL)?,
        best_path: metadata.get(KEY_BEST_PATH).map(PathBuf::from),
    };

    info!(path = path.display().to_string(), epoch = state.epoch; "checkpoint restored");
    Ok(state)
}

fn required<T: FromStr>(
    metadata: &HashMap<String, String>,
    path: &Path,
    key: &'static str,
) -> Result<T> {
    metadata
        .get(key)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| TrainErr::CheckpointMetadata {
            path: path.to_path_buf(),
            key,
        })
}

fn optional<T: FromStr>(
    metadata: &HashMap<String, String>,
    path: &Path,
    key: &'static str,
) -> Result<Option<T>> {
    match metadata.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| TrainErr::CheckpointMetadata {
                path: path.to_path_buf(),
                key,
            }),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.to_path_buf().into_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
