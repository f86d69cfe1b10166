/// Data loading modules for Dual training
pub mod loader;
pub mod scaler;
pub mod series;
pub mod time_features;

pub use loader::WindowLoader;
pub use scaler::StandardScaler;
pub use series::{DatasetKind, RawSeries, SeriesSplit, Window};

use std::ops::Range;
use std::sync::Arc;

use candle_core::{Device, Tensor};
use ndarray::s;

use crate::RunConfig;

/// One batch of windows
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input window `[batch, seq_len, num_nodes]`
    pub x: Tensor,
    /// Target window `[batch, pred_len, num_nodes]`
    pub y: Tensor,
    /// Input marks `[batch, seq_len, mark_dim]`
    pub x_mark: Tensor,
    /// Target marks `[batch, pred_len, mark_dim]`
    pub y_mark: Tensor,
}

/// Generic data loader trait
pub trait BatchDataLoader {
    /// Get next batch, `None` once the split is exhausted
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Batch>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;
}

/// Loaders for the three splits plus the scaler fitted on train
pub struct DataBundle {
    pub kind: DatasetKind,
    pub train: WindowLoader,
    pub val: WindowLoader,
    pub test: WindowLoader,
    pub scaler: StandardScaler,
}

/// Build train/val/test loaders for the configured dataset
///
/// The scaler is fit once on the train rows and applied unchanged to all
/// three splits. Train and val batches keep temporal order and drop a trailing
/// partial batch; test yields every window on its own.
pub fn load_data(config: &RunConfig) -> crate::Result<DataBundle> {
    let kind = DatasetKind::from_data_path(&config.data_path);
    let raw = RawSeries::load(&config.root_path, &config.data_path, kind)?;

    if raw.num_nodes() != config.num_nodes {
        return Err(crate::ForecastError::Shape(format!(
            "{} has {} series but num_nodes is {}",
            config.data_path,
            raw.num_nodes(),
            config.num_nodes
        )));
    }

    let [train_rows, val_rows, test_rows] = kind.borders(raw.rows(), config.seq_len);
    log::debug!(
        "Split rows: train {:?}, val {:?}, test {:?}",
        train_rows,
        val_rows,
        test_rows
    );

    let scaler = StandardScaler::fit(raw.values.slice(s![train_rows.clone(), ..]))?;
    let scaled = scaler.transform(raw.values.view())?;

    let make_split = |rows: Range<usize>, name: &str| -> crate::Result<SeriesSplit> {
        let split = SeriesSplit::new(
            scaled.slice(s![rows.clone(), ..]).to_owned(),
            raw.marks.slice(s![rows.clone(), ..]).to_owned(),
            config.seq_len,
            config.pred_len,
        )?;
        if split.is_empty() {
            return Err(crate::ForecastError::Data(format!(
                "{} split ({} rows) is too short for seq_len {} + pred_len {}",
                name,
                rows.len(),
                config.seq_len,
                config.pred_len
            )));
        }
        log::info!("{} windows: {}", name, split.len());
        Ok(split)
    };

    let train_split = make_split(train_rows, "train")?;
    let val_split = make_split(val_rows, "val")?;
    let test_split = make_split(test_rows, "test")?;

    let mut train = WindowLoader::new(train_split, config.batch_size, true);
    let mut val = WindowLoader::new(val_split, config.batch_size, true);
    let mut test = WindowLoader::new(test_split, 1, false);

    if config.num_workers > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .thread_name(|i| format!("loader-{}", i))
            .build()
            .map_err(|e| crate::ForecastError::Resource(format!("loader pool: {}", e)))?;
        let pool = Arc::new(pool);
        train = train.with_pool(pool.clone());
        val = val.with_pool(pool.clone());
        test = test.with_pool(pool);
    }

    Ok(DataBundle {
        kind,
        train,
        val,
        test,
        scaler,
    })
}
