/// Train the Dual forecaster, keep the best checkpoint, report test metrics
use std::time::Instant;

use timekd::training::run_experiment;
use timekd::RunConfig;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RunConfig::from_args(std::env::args_os())?;

    let t1 = Instant::now();
    let report = run_experiment(&config)?;
    let elapsed = t1.elapsed().as_secs_f64();

    log::info!(
        "Best epoch {} of {}, test MSE {:.4}, test MAE {:.4}",
        report.best_epoch,
        report.epochs_run,
        report.test.avg_mse(),
        report.test.avg_mae()
    );
    log::info!("Total time spent: {:.4}", elapsed);

    Ok(())
}
