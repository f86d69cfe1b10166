/// Epoch loop with best-checkpoint selection and early stopping
use std::path::PathBuf;
use std::time::Instant;

use candle_core::{Device, Tensor};

use super::checkpoint::CheckpointMetadata;
use super::engine::TrainingEngine;
use super::metrics::HorizonMetrics;
use crate::data::BatchDataLoader;
use crate::utils::mean;
use crate::{ForecastError, RunConfig};

/// Up to this epoch a validation improvement alone selects the checkpoint;
/// later epochs must also improve the averaged test MSE.
pub const TEST_GATE_EPOCH: usize = 10;

/// Fit loop configuration
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Maximum number of epochs
    pub epochs: usize,
    /// Epochs without a checkpoint before stopping (never before `epochs / 2`)
    pub patience: usize,
    /// Directory holding `best_model.pth`
    pub run_dir: PathBuf,
    pub model_name: String,
}

impl FitConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            epochs: config.epochs,
            patience: config.es_patience,
            run_dir: config.run_dir(),
            model_name: config.model_name.clone(),
        }
    }
}

/// Run-tracking state of the epoch loop
#[derive(Debug, Clone)]
pub struct TrainingState {
    pub best_valid_loss: f64,
    pub best_test_mse: f64,
    pub epochs_since_best: usize,
    /// Epoch (1-based) of the saved checkpoint
    pub best_epoch: Option<usize>,
    pub valid_history: Vec<f64>,
    pub train_history: Vec<f64>,
    /// Seconds per train pass
    pub train_times: Vec<f64>,
    /// Seconds per validation pass
    pub valid_times: Vec<f64>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            best_valid_loss: f64::INFINITY,
            best_test_mse: f64::INFINITY,
            epochs_since_best: 0,
            best_epoch: None,
            valid_history: Vec::new(),
            train_history: Vec::new(),
            train_times: Vec::new(),
            valid_times: Vec::new(),
        }
    }
}

impl TrainingState {
    fn should_stop(&self, epoch: usize, config: &FitConfig) -> bool {
        self.epochs_since_best >= config.patience && epoch >= config.epochs / 2
    }
}

/// Outcome of a full fit
#[derive(Debug, Clone, serde::Serialize)]
pub struct FitReport {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_valid_loss: f64,
    pub mean_train_time: f64,
    pub mean_valid_time: f64,
    pub train_losses: Vec<f64>,
    pub valid_losses: Vec<f64>,
    /// Test metrics of the restored best checkpoint
    pub test: HorizonMetrics,
}

/// Predict every test window and score per horizon
pub fn evaluate<E, L>(engine: &E, loader: &mut L, device: &Device) -> crate::Result<HorizonMetrics>
where
    E: TrainingEngine,
    L: BatchDataLoader,
{
    let mut outputs = Vec::with_capacity(loader.num_batches());
    let mut targets = Vec::with_capacity(loader.num_batches());

    loader.reset();
    while let Some(batch) = loader.next_batch(device)? {
        outputs.push(engine.predict(&batch)?);
        targets.push(batch.y);
    }
    if outputs.is_empty() {
        return Err(ForecastError::Data("test split yields no windows".to_string()));
    }

    let preds = Tensor::cat(&outputs, 0)?;
    let reals = Tensor::cat(&targets, 0)?;
    HorizonMetrics::compute(&preds, &reals)
}

fn checkpoint_metadata<E: TrainingEngine>(
    engine: &E,
    config: &FitConfig,
    epoch: usize,
    valid_loss: f64,
    test: Option<&HorizonMetrics>,
) -> CheckpointMetadata {
    CheckpointMetadata {
        epoch,
        valid_loss,
        test_mse: test.map(|t| t.avg_mse()),
        test_mae: test.map(|t| t.avg_mae()),
        lr: engine.learning_rate(),
        model_name: config.model_name.clone(),
    }
}

/// Train until `epochs` or early stop, then restore the best checkpoint and
/// score it on the test split
pub fn fit<E, L>(
    engine: &mut E,
    train_loader: &mut L,
    val_loader: &mut L,
    test_loader: &mut L,
    device: &Device,
    config: &FitConfig,
) -> crate::Result<FitReport>
where
    E: TrainingEngine,
    L: BatchDataLoader,
{
    if train_loader.num_batches() == 0 || val_loader.num_batches() == 0 {
        return Err(ForecastError::Data(
            "train and val splits must each yield at least one full batch".to_string(),
        ));
    }

    log::info!("Start training...");
    log::info!(
        "Batches per epoch: train {}, val {}, test {}",
        train_loader.num_batches(),
        val_loader.num_batches(),
        test_loader.num_batches()
    );

    let mut state = TrainingState::default();
    let mut epochs_run = 0;

    for epoch in 1..=config.epochs {
        epochs_run = epoch;

        let mut train_loss = Vec::with_capacity(train_loader.num_batches());
        let mut train_mae = Vec::with_capacity(train_loader.num_batches());
        let t1 = Instant::now();
        train_loader.reset();
        while let Some(batch) = train_loader.next_batch(device)? {
            let metrics = engine.train_step(&batch)?;
            log::trace!("train batch: loss={:.4}, mae={:.4}", metrics.loss, metrics.mae);
            train_loss.push(metrics.loss);
            train_mae.push(metrics.mae);
        }
        let train_time = t1.elapsed().as_secs_f64();
        state.train_times.push(train_time);
        log::info!("Epoch: {:03}, Training Time: {:.4} secs", epoch, train_time);

        let mut valid_loss = Vec::with_capacity(val_loader.num_batches());
        let mut valid_mae = Vec::with_capacity(val_loader.num_batches());
        let s1 = Instant::now();
        val_loader.reset();
        while let Some(batch) = val_loader.next_batch(device)? {
            let metrics = engine.eval_step(&batch)?;
            valid_loss.push(metrics.loss);
            valid_mae.push(metrics.mae);
        }
        let valid_time = s1.elapsed().as_secs_f64();
        state.valid_times.push(valid_time);
        log::info!("Epoch: {:03}, Inference Time: {:.4} secs", epoch, valid_time);

        let mtrain_loss = mean(&train_loss);
        let mvalid_loss = mean(&valid_loss);
        state.train_history.push(mtrain_loss);
        state.valid_history.push(mvalid_loss);

        log::info!(
            "Epoch: {:03}, Train Loss: {:.4}, Train MAE: {:.4}",
            epoch,
            mtrain_loss,
            mean(&train_mae)
        );
        log::info!(
            "Epoch: {:03}, Valid Loss: {:.4}, Valid MAE: {:.4}",
            epoch,
            mvalid_loss,
            mean(&valid_mae)
        );

        if mvalid_loss < state.best_valid_loss {
            if epoch <= TEST_GATE_EPOCH {
                let metadata = checkpoint_metadata(&*engine, config, epoch, mvalid_loss, None);
                engine.save_checkpoint(&config.run_dir, &metadata)?;
                state.best_valid_loss = mvalid_loss;
                state.best_epoch = Some(epoch);
                state.epochs_since_best = 0;
                log::info!("Updating! Valid Loss: {:.4}, epoch: {}", mvalid_loss, epoch);
            } else {
                let test = evaluate(&*engine, test_loader, device)?;
                let (amse, amae) = (test.avg_mse(), test.avg_mae());
                if amse < state.best_test_mse {
                    let metadata = checkpoint_metadata(&*engine, config, epoch, mvalid_loss, Some(&test));
                    engine.save_checkpoint(&config.run_dir, &metadata)?;
                    state.best_test_mse = amse;
                    state.best_valid_loss = mvalid_loss;
                    state.best_epoch = Some(epoch);
                    state.epochs_since_best = 0;
                    log::info!(
                        "Test low! Updating! Test MSE: {:.4}, Test MAE: {:.4}, Valid Loss: {:.4}, epoch: {}",
                        amse,
                        amae,
                        mvalid_loss,
                        epoch
                    );
                } else {
                    state.epochs_since_best += 1;
                    log::info!("No update (test MSE {:.4} >= {:.4})", amse, state.best_test_mse);
                }
            }
        } else {
            state.epochs_since_best += 1;
            log::info!("No update");
        }

        let lr = engine.scheduler_step();
        log::debug!("Epoch: {:03}, next lr {:.3e}", epoch, lr);

        if state.should_stop(epoch, config) {
            log::info!("Early stop at epoch {}", epoch);
            break;
        }
    }

    let mean_train_time = mean(&state.train_times);
    let mean_valid_time = mean(&state.valid_times);
    log::info!("Average Training Time: {:.4} secs/epoch", mean_train_time);
    log::info!("Average Inference Time: {:.4} secs", mean_valid_time);

    let best_epoch = state.best_epoch.ok_or_else(|| {
        ForecastError::Checkpoint("validation loss never improved, no checkpoint was written".to_string())
    })?;
    let best_valid_loss = state.valid_history[best_epoch - 1];

    log::info!("Training ends");
    log::info!("The epoch of the best result: {}", best_epoch);
    log::info!("The valid loss of the best model: {:.4}", best_valid_loss);

    engine.load_checkpoint(&config.run_dir)?;
    let test = evaluate(&*engine, test_loader, device)?;

    for h in 0..test.horizon() {
        log::info!(
            "Evaluate best model on test data for horizon {}, Test MSE: {:.4}, Test MAE: {:.4}",
            h + 1,
            test.mse[h],
            test.mae[h]
        );
    }
    log::info!(
        "On average horizons, Test MSE: {:.4}, Test MAE: {:.4}",
        test.avg_mse(),
        test.avg_mae()
    );

    Ok(FitReport {
        epochs_run,
        best_epoch,
        best_valid_loss,
        mean_train_time,
        mean_valid_time,
        train_losses: state.train_history,
        valid_losses: state.valid_history,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Batch;
    use crate::training::engine::StepMetrics;
    use candle_core::DType;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::Path;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Event {
        Train,
        Eval,
        Predict,
        Scheduler,
        Save(usize),
        Load,
    }

    /// Engine replaying scripted validation losses and test errors per epoch
    struct ScriptedEngine {
        valid_losses: Vec<f64>,
        /// Constant prediction offset per epoch; test MSE is its square
        test_offsets: HashMap<usize, f64>,
        epoch: usize,
        events: RefCell<Vec<Event>>,
    }

    impl ScriptedEngine {
        fn new(valid_losses: &[f64]) -> Self {
            Self {
                valid_losses: valid_losses.to_vec(),
                test_offsets: HashMap::new(),
                epoch: 1,
                events: RefCell::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.borrow().clone()
        }

        fn count(&self, event: Event) -> usize {
            self.events.borrow().iter().filter(|&&e| e == event).count()
        }
    }

    impl TrainingEngine for ScriptedEngine {
        fn train_step(&mut self, _batch: &Batch) -> crate::Result<StepMetrics> {
            self.events.borrow_mut().push(Event::Train);
            Ok(StepMetrics { loss: 1.0, mae: 1.0 })
        }

        fn eval_step(&self, _batch: &Batch) -> crate::Result<StepMetrics> {
            self.events.borrow_mut().push(Event::Eval);
            let loss = self
                .valid_losses
                .get(self.epoch - 1)
                .copied()
                .unwrap_or(f64::NAN);
            Ok(StepMetrics { loss, mae: loss })
        }

        fn predict(&self, batch: &Batch) -> crate::Result<Tensor> {
            self.events.borrow_mut().push(Event::Predict);
            let offset = self.test_offsets.get(&self.epoch).copied().unwrap_or(0.0);
            Ok((batch.y.ones_like()? * offset)?)
        }

        fn scheduler_step(&mut self) -> f64 {
            self.events.borrow_mut().push(Event::Scheduler);
            self.epoch += 1;
            1e-4
        }

        fn learning_rate(&self) -> f64 {
            1e-4
        }

        fn save_checkpoint(&self, _dir: &Path, metadata: &CheckpointMetadata) -> crate::Result<()> {
            self.events.borrow_mut().push(Event::Save(metadata.epoch));
            Ok(())
        }

        fn load_checkpoint(&mut self, _dir: &Path) -> crate::Result<()> {
            self.events.borrow_mut().push(Event::Load);
            Ok(())
        }
    }

    fn saved_epochs(engine: &ScriptedEngine) -> Vec<usize> {
        engine
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Save(epoch) => Some(epoch),
                _ => None,
            })
            .collect()
    }

    struct VecLoader {
        batches: Vec<Batch>,
        idx: usize,
    }

    impl VecLoader {
        fn new(n: usize) -> crate::Result<Self> {
            let device = Device::Cpu;
            let mut batches = Vec::with_capacity(n);
            for _ in 0..n {
                batches.push(Batch {
                    x: Tensor::zeros((1, 2, 1), DType::F32, &device)?,
                    y: Tensor::zeros((1, 3, 1), DType::F32, &device)?,
                    x_mark: Tensor::zeros((1, 2, 1), DType::F32, &device)?,
                    y_mark: Tensor::zeros((1, 3, 1), DType::F32, &device)?,
                });
            }
            Ok(Self { batches, idx: 0 })
        }
    }

    impl BatchDataLoader for VecLoader {
        fn next_batch(&mut self, _device: &Device) -> crate::Result<Option<Batch>> {
            let batch = self.batches.get(self.idx).cloned();
            self.idx += 1;
            Ok(batch)
        }

        fn reset(&mut self) {
            self.idx = 0;
        }

        fn num_batches(&self) -> usize {
            self.batches.len()
        }
    }

    fn fit_config(epochs: usize, patience: usize) -> FitConfig {
        FitConfig {
            epochs,
            patience,
            run_dir: PathBuf::from("unused"),
            model_name: "gpt2".to_string(),
        }
    }

    fn run(engine: &mut ScriptedEngine, config: &FitConfig) -> crate::Result<FitReport> {
        let mut train = VecLoader::new(3)?;
        let mut val = VecLoader::new(2)?;
        let mut test = VecLoader::new(4)?;
        fit(engine, &mut train, &mut val, &mut test, &Device::Cpu, config)
    }

    #[test]
    fn test_short_run_without_test_passes() -> crate::Result<()> {
        let mut engine = ScriptedEngine::new(&[0.9, 0.8, 0.7, 0.6, 0.5]);
        let report = run(&mut engine, &fit_config(5, 50))?;

        assert_eq!(report.epochs_run, 5);
        assert_eq!(report.best_epoch, 5);
        assert_eq!(engine.count(Event::Scheduler), 5);

        // Predictions only come from the final evaluation after reload
        let events = engine.events();
        let load_at = events.iter().position(|&e| e == Event::Load).unwrap();
        assert!(events[..load_at].iter().all(|&e| e != Event::Predict));
        assert_eq!(engine.count(Event::Predict), 4);

        Ok(())
    }

    #[test]
    fn test_scheduler_once_per_epoch_after_both_passes() -> crate::Result<()> {
        let mut engine = ScriptedEngine::new(&[0.5; 12]);
        let report = run(&mut engine, &fit_config(12, 100))?;
        assert_eq!(report.epochs_run, 12);

        let events = engine.events();
        let load_at = events.iter().position(|&e| e == Event::Load).unwrap();
        let epochs: Vec<&[Event]> = events[..load_at]
            .split_inclusive(|&e| e == Event::Scheduler)
            .collect();
        assert_eq!(epochs.len(), 12);

        for epoch in epochs {
            assert_eq!(*epoch.last().unwrap(), Event::Scheduler);
            assert_eq!(epoch.iter().filter(|&&e| e == Event::Scheduler).count(), 1);
            assert_eq!(epoch.iter().filter(|&&e| e == Event::Train).count(), 3);
            assert_eq!(epoch.iter().filter(|&&e| e == Event::Eval).count(), 2);

            let last_train = epoch.iter().rposition(|&e| e == Event::Train).unwrap();
            let first_eval = epoch.iter().position(|&e| e == Event::Eval).unwrap();
            assert!(last_train < first_eval);
        }

        Ok(())
    }

    #[test]
    fn test_patience_stops_at_epoch_five() -> crate::Result<()> {
        let mut engine = ScriptedEngine::new(&[0.5, 0.4, 0.6, 0.6, 0.6, 0.6, 0.6, 0.6, 0.6, 0.6]);
        let report = run(&mut engine, &fit_config(10, 2))?;

        assert_eq!(report.epochs_run, 5);
        assert_eq!(report.best_epoch, 2);
        assert!((report.best_valid_loss - 0.4).abs() < 1e-12);
        assert_eq!(report.valid_losses.len(), 5);
        assert_eq!(saved_epochs(&engine), vec![1, 2]);

        Ok(())
    }

    #[test]
    fn test_no_stop_before_half_of_epochs() -> crate::Result<()> {
        let mut engine = ScriptedEngine::new(&[0.5; 12]);
        let report = run(&mut engine, &fit_config(12, 1))?;

        // stalled from epoch 2, but stopping waits for epoch 6
        assert_eq!(report.epochs_run, 6);
        assert_eq!(saved_epochs(&engine), vec![1]);

        Ok(())
    }

    #[test]
    fn test_late_epochs_need_test_improvement() -> crate::Result<()> {
        let losses: Vec<f64> = (0..14).map(|i| 1.0 - 0.05 * i as f64).collect();
        let mut engine = ScriptedEngine::new(&losses);
        engine.test_offsets = HashMap::from([(11, 0.5), (12, 0.7), (13, 0.4), (14, 0.9)]);

        let report = run(&mut engine, &fit_config(14, 50))?;

        let mut expected: Vec<usize> = (1..=11).collect();
        expected.push(13);
        assert_eq!(saved_epochs(&engine), expected);
        assert_eq!(report.best_epoch, 13);

        // Test passes at epochs 11-14 plus the final one, four windows each
        assert_eq!(engine.count(Event::Predict), 5 * 4);

        Ok(())
    }

    #[test]
    fn test_saved_checkpoints_improve_monotonically() -> crate::Result<()> {
        let losses = [0.8, 0.9, 0.7, 0.75, 0.6, 0.65, 0.61, 0.5];
        let mut engine = ScriptedEngine::new(&losses);
        run(&mut engine, &fit_config(8, 50))?;

        let saved = saved_epochs(&engine);
        assert_eq!(saved, vec![1, 3, 5, 8]);
        for pair in saved.windows(2) {
            assert!(losses[pair[1] - 1] < losses[pair[0] - 1]);
        }

        Ok(())
    }

    #[test]
    fn test_no_checkpoint_is_an_error() -> crate::Result<()> {
        let mut engine = ScriptedEngine::new(&[f64::NAN; 4]);
        let result = run(&mut engine, &fit_config(4, 50));

        assert!(matches!(result, Err(ForecastError::Checkpoint(_))));
        assert_eq!(engine.count(Event::Load), 0);

        Ok(())
    }

    #[test]
    fn test_empty_train_split_rejected() -> crate::Result<()> {
        let mut engine = ScriptedEngine::new(&[0.5]);
        let mut train = VecLoader::new(0)?;
        let mut val = VecLoader::new(2)?;
        let mut test = VecLoader::new(1)?;

        let result = fit(&mut engine, &mut train, &mut val, &mut test, &Device::Cpu, &fit_config(1, 1));
        assert!(matches!(result, Err(ForecastError::Data(_))));

        Ok(())
    }
}
