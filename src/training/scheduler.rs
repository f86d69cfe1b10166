/// Epoch-based cosine annealing learning rate schedule
use std::f64::consts::PI;

/// Cosine annealing configuration
#[derive(Debug, Clone)]
pub struct CosineAnnealingConfig {
    /// Learning rate at epoch 0
    pub lr_init: f64,
    /// Floor reached after `t_max` steps
    pub eta_min: f64,
    /// Steps in one half cosine period
    pub t_max: usize,
}

impl CosineAnnealingConfig {
    pub fn new(lr_init: f64, t_max: usize) -> Self {
        Self {
            lr_init,
            eta_min: 1e-6,
            t_max,
        }
    }
}

/// Cosine annealing scheduler
///
/// `lr(t) = eta_min + (lr_init - eta_min) * (1 + cos(pi * t / t_max)) / 2`,
/// stepped once per epoch.
#[derive(Debug, Clone)]
pub struct CosineAnnealing {
    config: CosineAnnealingConfig,
    current_step: usize,
}

impl CosineAnnealing {
    pub fn new(config: CosineAnnealingConfig) -> Self {
        Self {
            config,
            current_step: 0,
        }
    }

    /// Learning rate for the current step
    pub fn get_lr(&self) -> f64 {
        self.get_lr_at_step(self.current_step)
    }

    pub fn get_lr_at_step(&self, step: usize) -> f64 {
        if self.config.t_max == 0 {
            return self.config.lr_init;
        }
        let progress = (step as f64 / self.config.t_max as f64).clamp(0.0, 1.0);
        let cosine_factor = 0.5 * (1.0 + (PI * progress).cos());
        self.config.eta_min + (self.config.lr_init - self.config.eta_min) * cosine_factor
    }

    /// Advance one step and return the new learning rate
    pub fn step(&mut self) -> f64 {
        self.current_step += 1;
        self.get_lr()
    }

    pub fn get_step(&self) -> usize {
        self.current_step
    }
}
