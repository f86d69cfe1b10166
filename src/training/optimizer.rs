/// AdamW construction and gradient clipping
///
/// The update rule itself is candle's `AdamW`; this module fixes its
/// hyperparameters and adds global-norm clipping over a `GradStore`.
use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

/// AdamW optimizer configuration
#[derive(Debug, Clone)]
pub struct AdamWConfig {
    /// Learning rate
    pub lr: f64,
    /// Coefficient for computing running averages of gradient (beta1)
    pub beta1: f64,
    /// Coefficient for computing running averages of squared gradient (beta2)
    pub beta2: f64,
    /// Term added to denominator for numerical stability
    pub eps: f64,
    /// Weight decay coefficient
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 1e-3,
        }
    }
}

/// AdamW over `vars` with decoupled weight decay
pub fn build_adamw(vars: Vec<Var>, config: &AdamWConfig) -> Result<AdamW> {
    AdamW::new(
        vars,
        ParamsAdamW {
            lr: config.lr,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: config.weight_decay,
        },
    )
}

/// Rescale gradients in place so their global L2 norm is at most `max_norm`
///
/// Returns the norm measured before clipping. Variables without a gradient
/// are skipped.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut sum_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            sum_sq += grad
                .to_dtype(candle_core::DType::F64)?
                .sqr()?
                .sum_all()?
                .to_scalar::<f64>()?;
        }
    }
    let total_norm = sum_sq.sqrt();

    let coef = max_norm / (total_norm + 1e-6);
    if coef < 1.0 {
        for var in vars {
            let clipped = match grads.get(var.as_tensor()) {
                Some(grad) => (grad * coef)?,
                None => continue,
            };
            grads.insert(var.as_tensor(), clipped);
        }
    }

    Ok(total_norm)
}

/// Current learning rate of any candle optimizer
pub fn current_lr<O: Optimizer>(optimizer: &O) -> f64 {
    optimizer.learning_rate()
}
