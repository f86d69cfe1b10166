/// Batched, restartable iteration over a series split
use std::sync::Arc;

use candle_core::{Device, Tensor};
use rayon::prelude::*;
use rayon::ThreadPool;

use super::series::{SeriesSplit, Window};
use super::{Batch, BatchDataLoader};

/// Sequential loader over the windows of one split
///
/// Windows are always visited in order. With a worker pool the windows of a
/// batch are sliced in parallel and collected back in order.
pub struct WindowLoader {
    split: SeriesSplit,
    batch_size: usize,
    drop_last: bool,
    current_idx: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl WindowLoader {
    /// Create new loader
    pub fn new(split: SeriesSplit, batch_size: usize, drop_last: bool) -> Self {
        Self {
            split,
            batch_size: batch_size.max(1),
            drop_last,
            current_idx: 0,
            pool: None,
        }
    }

    /// Assemble batches on the given worker pool
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn split(&self) -> &SeriesSplit {
        &self.split
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn collect_windows(&self, start: usize, end: usize) -> Vec<Window> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                (start..end)
                    .into_par_iter()
                    .map(|i| self.split.window(i))
                    .collect()
            }),
            None => (start..end).map(|i| self.split.window(i)).collect(),
        }
    }

    /// Get next batch
    pub fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Batch>> {
        let total = self.split.len();
        if self.current_idx >= total {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(total);
        if self.drop_last && end_idx - self.current_idx < self.batch_size {
            self.current_idx = total;
            return Ok(None);
        }

        let windows = self.collect_windows(self.current_idx, end_idx);
        self.current_idx = end_idx;

        let b = windows.len();
        let (seq_len, pred_len) = (self.split.seq_len(), self.split.pred_len());
        let (n, m) = (self.split.num_nodes(), self.split.mark_dim());

        let mut x = Vec::with_capacity(b * seq_len * n);
        let mut y = Vec::with_capacity(b * pred_len * n);
        let mut x_mark = Vec::with_capacity(b * seq_len * m);
        let mut y_mark = Vec::with_capacity(b * pred_len * m);
        for w in windows {
            x.extend(w.x);
            y.extend(w.y);
            x_mark.extend(w.x_mark);
            y_mark.extend(w.y_mark);
        }

        Ok(Some(Batch {
            x: Tensor::from_vec(x, (b, seq_len, n), device)?,
            y: Tensor::from_vec(y, (b, pred_len, n), device)?,
            x_mark: Tensor::from_vec(x_mark, (b, seq_len, m), device)?,
            y_mark: Tensor::from_vec(y_mark, (b, pred_len, m), device)?,
        }))
    }

    /// Reset loader for new epoch
    pub fn reset(&mut self) {
        self.current_idx = 0;
    }

    /// Get number of batches
    pub fn num_batches(&self) -> usize {
        let total = self.split.len();
        if self.drop_last {
            total / self.batch_size
        } else {
            (total + self.batch_size - 1) / self.batch_size
        }
    }
}

impl BatchDataLoader for WindowLoader {
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Batch>> {
        WindowLoader::next_batch(self, device)
    }

    fn reset(&mut self) {
        WindowLoader::reset(self)
    }

    fn num_batches(&self) -> usize {
        WindowLoader::num_batches(self)
    }
}
