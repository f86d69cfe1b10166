/// Training infrastructure for the Dual forecaster
pub mod checkpoint;
pub mod engine;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::CheckpointMetadata;
pub use engine::{Engine, StepMetrics, TrainingEngine};
pub use metrics::HorizonMetrics;
pub use scheduler::CosineAnnealing;
pub use trainer::{fit, FitConfig, FitReport, TrainingState};

use crate::RunConfig;

/// Run one full experiment: data, engine, fit, final test
pub fn run_experiment(config: &RunConfig) -> crate::Result<FitReport> {
    config.validate()?;
    log::info!("{:?}", config);

    let spec: crate::device::DeviceSpec = config.device.parse()?;
    let device = spec.open()?;
    log::info!("Using device {}", spec);

    let mut data = crate::data::load_data(config)?;

    let fit_config = FitConfig::from_run_config(config);
    std::fs::create_dir_all(&fit_config.run_dir)?;
    std::fs::write(
        fit_config.run_dir.join("args.json"),
        serde_json::to_string_pretty(config)?,
    )?;
    log::info!("Run directory: {}", fit_config.run_dir.display());

    let mut engine = Engine::new(config, data.train.split().mark_dim(), &device)?;

    fit(
        &mut engine,
        &mut data.train,
        &mut data.val,
        &mut data.test,
        &device,
        &fit_config,
    )
}
