/// Training engine: Dual model + AdamW + cosine schedule
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer};

use super::checkpoint::{self, CheckpointMetadata};
use super::metrics;
use super::optimizer::{build_adamw, clip_grad_norm, AdamWConfig};
use super::scheduler::{CosineAnnealing, CosineAnnealingConfig};
use crate::data::Batch;
use crate::{Dual, DualConfig, RunConfig};

/// Global gradient-norm bound applied before every update
pub const GRAD_CLIP: f64 = 5.0;

/// Mean loss and MAE of one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub loss: f64,
    pub mae: f64,
}

/// What the epoch loop needs from a model/optimizer pair
pub trait TrainingEngine {
    /// One optimisation step on `batch`
    fn train_step(&mut self, batch: &Batch) -> crate::Result<StepMetrics>;

    /// Loss and MAE on `batch` without touching parameters
    fn eval_step(&self, batch: &Batch) -> crate::Result<StepMetrics>;

    /// Inference-mode prediction shaped like `batch.y`
    fn predict(&self, batch: &Batch) -> crate::Result<Tensor>;

    /// Advance the learning-rate schedule by one epoch
    fn scheduler_step(&mut self) -> f64;

    fn learning_rate(&self) -> f64;

    fn save_checkpoint(&self, dir: &Path, metadata: &CheckpointMetadata) -> crate::Result<()>;

    fn load_checkpoint(&mut self, dir: &Path) -> crate::Result<()>;
}

pub struct Engine {
    model: Dual,
    optimizer: AdamW,
    scheduler: CosineAnnealing,
    trainable: Vec<Var>,
    clip: Option<f64>,
    device: Device,
}

impl Engine {
    pub fn new(config: &RunConfig, mark_dim: usize, device: &Device) -> crate::Result<Self> {
        let model = Dual::new(DualConfig::from_run_config(config, mark_dim), device)?;

        log::info!("The number of trainable parameters: {}", model.count_trainable_params());
        log::info!("The number of parameters: {}", model.param_num());

        let trainable = model.trainable_vars();
        let optimizer = build_adamw(
            trainable.clone(),
            &AdamWConfig {
                lr: config.lrate,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;
        let scheduler = CosineAnnealing::new(CosineAnnealingConfig::new(config.lrate, config.epochs));

        Ok(Self {
            model,
            optimizer,
            scheduler,
            trainable,
            clip: Some(GRAD_CLIP),
            device: device.clone(),
        })
    }

    pub fn model(&self) -> &Dual {
        &self.model
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, batch: &Batch, train: bool) -> crate::Result<Tensor> {
        self.model
            .forward(&batch.x, &batch.y, &batch.x_mark, &batch.y_mark, train)
    }
}

fn scalar(t: &Tensor) -> crate::Result<f64> {
    Ok(t.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}

impl TrainingEngine for Engine {
    fn train_step(&mut self, batch: &Batch) -> crate::Result<StepMetrics> {
        self.model
            .check_batch(&batch.x, &batch.y, &batch.x_mark, &batch.y_mark)?;

        let predict = self.forward(batch, true)?;
        let loss = candle_nn::loss::mse(&predict, &batch.y)?;

        let mut grads = loss.backward()?;
        if let Some(max_norm) = self.clip {
            let norm = clip_grad_norm(&mut grads, &self.trainable, max_norm)?;
            log::trace!("grad norm {:.4}", norm);
        }
        self.optimizer.step(&grads)?;

        Ok(StepMetrics {
            loss: scalar(&loss)?,
            mae: metrics::mae(&predict, &batch.y)?,
        })
    }

    fn eval_step(&self, batch: &Batch) -> crate::Result<StepMetrics> {
        let predict = self.forward(batch, false)?;
        let (loss, mae) = metrics::metric(&predict, &batch.y)?;
        Ok(StepMetrics { loss, mae })
    }

    fn predict(&self, batch: &Batch) -> crate::Result<Tensor> {
        self.forward(batch, false)
    }

    fn scheduler_step(&mut self) -> f64 {
        let lr = self.scheduler.step();
        self.optimizer.set_learning_rate(lr);
        lr
    }

    fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    fn save_checkpoint(&self, dir: &Path, metadata: &CheckpointMetadata) -> crate::Result<()> {
        checkpoint::save_checkpoint(self.model.varmap(), dir, metadata)
    }

    fn load_checkpoint(&mut self, dir: &Path) -> crate::Result<()> {
        checkpoint::load_checkpoint(self.model.varmap_mut(), dir)
    }
}
