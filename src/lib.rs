//! TimeKD - Rust training driver for the Dual time-series forecaster
//!
//! Trains a forecaster that pairs a language-model-sized context path with a
//! lightweight student encoder, selects the best checkpoint by validation loss
//! (and, after the first epochs, by test MSE), then reports horizon-wise test
//! metrics for the restored best model.
//!
//! # Pipeline
//!
//! - **config**: command-line hyperparameters
//! - **data**: windowed train/val/test splits sharing one fitted scaler
//! - **models**: the `Dual` forecaster
//! - **training**: engine (model + AdamW + cosine schedule) and epoch loop
//!
//! # Example
//!
//! ```ignore
//! use timekd::{RunConfig, training::run_experiment};
//!
//! let config = RunConfig::from_args(std::env::args_os())?;
//! let report = run_experiment(&config)?;
//! println!("test mse {:.4}", report.test.avg_mse());
//! ```

pub mod config;
pub mod data;
pub mod device;
pub mod layers;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::RunConfig;
pub use models::{Dual, DualConfig};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
