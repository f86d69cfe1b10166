/// Best-model checkpointing with safetensors
use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use safetensors::SafeTensors;

use crate::ForecastError;

/// Parameter file inside a run directory
pub const MODEL_FILE: &str = "best_model.pth";
/// Metadata sidecar inside a run directory
pub const METADATA_FILE: &str = "best_model.json";

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Epoch (1-based) the parameters come from
    pub epoch: usize,
    /// Mean validation loss of that epoch
    pub valid_loss: f64,
    /// Averaged test MSE when a test pass gated the save
    pub test_mse: Option<f64>,
    /// Averaged test MAE when a test pass gated the save
    pub test_mae: Option<f64>,
    /// Learning rate at checkpoint
    pub lr: f64,
    pub model_name: String,
}

pub fn model_path(dir: &Path) -> PathBuf {
    dir.join(MODEL_FILE)
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

/// Write all parameters and the metadata sidecar into `dir`, replacing any
/// previous checkpoint
pub fn save_checkpoint(varmap: &VarMap, dir: &Path, metadata: &CheckpointMetadata) -> crate::Result<()> {
    std::fs::create_dir_all(dir)?;

    let path = model_path(dir);
    varmap
        .save(&path)
        .map_err(|e| ForecastError::Checkpoint(format!("failed to write {}: {}", path.display(), e)))?;

    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(metadata_path(dir), json)?;

    log::debug!("Saved checkpoint to {}", path.display());
    Ok(())
}

/// Restore every parameter of `varmap` from `dir`
///
/// The file is checked before any variable is touched: it must parse, and
/// every registered parameter must be present with a matching shape.
pub fn load_checkpoint(varmap: &mut VarMap, dir: &Path) -> crate::Result<()> {
    let path = model_path(dir);
    if !path.exists() {
        return Err(ForecastError::Checkpoint(format!(
            "no checkpoint at {}",
            path.display()
        )));
    }

    let bytes = std::fs::read(&path)?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
        ForecastError::Checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e))
    })?;

    for (name, var) in crate::utils::named_vars(varmap) {
        let view = tensors.tensor(&name).map_err(|_| {
            ForecastError::Checkpoint(format!("parameter {} missing from {}", name, path.display()))
        })?;
        if view.shape() != var.dims() {
            return Err(ForecastError::Checkpoint(format!(
                "parameter {} has shape {:?} in checkpoint, model expects {:?}",
                name,
                view.shape(),
                var.dims()
            )));
        }
    }

    varmap
        .load(&path)
        .map_err(|e| ForecastError::Checkpoint(format!("failed to load {}: {}", path.display(), e)))?;

    log::debug!("Loaded checkpoint from {}", path.display());
    Ok(())
}

/// Read the metadata sidecar
pub fn load_metadata(dir: &Path) -> crate::Result<CheckpointMetadata> {
    let path = metadata_path(dir);
    let data = std::fs::read(&path).map_err(|e| {
        ForecastError::Checkpoint(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_slice(&data)?)
}
