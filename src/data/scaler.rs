/// Per-column standardisation fitted on the training rows
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Standard scaler (population mean / standard deviation per column)
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StandardScaler {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl StandardScaler {
    /// Fit on `[rows, columns]` data
    ///
    /// Columns with zero variance keep a scale of 1 so they map to 0.
    pub fn fit(data: ArrayView2<f32>) -> crate::Result<Self> {
        if data.nrows() == 0 {
            return Err(crate::ForecastError::Data(
                "cannot fit scaler on an empty split".to_string(),
            ));
        }

        let mean: Array1<f32> = data
            .mean_axis(Axis(0))
            .ok_or_else(|| crate::ForecastError::Data("empty scaler input".to_string()))?;
        let std = data.std_axis(Axis(0), 0.0);

        Ok(Self {
            mean: mean.to_vec(),
            std: std
                .iter()
                .map(|&s| if s > f32::EPSILON { s } else { 1.0 })
                .collect(),
        })
    }

    /// Number of columns the scaler was fitted on
    pub fn num_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn std(&self) -> &[f32] {
        &self.std
    }

    /// `(x - mean) / std` column-wise
    pub fn transform(&self, data: ArrayView2<f32>) -> crate::Result<Array2<f32>> {
        self.check_columns(data.ncols())?;
        let mut out = data.to_owned();
        for (mut column, (&m, &s)) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(self.std.iter()))
        {
            column.mapv_inplace(|v| (v - m) / s);
        }
        Ok(out)
    }

    /// `x * std + mean` column-wise
    pub fn inverse_transform(&self, data: ArrayView2<f32>) -> crate::Result<Array2<f32>> {
        self.check_columns(data.ncols())?;
        let mut out = data.to_owned();
        for (mut column, (&m, &s)) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(self.std.iter()))
        {
            column.mapv_inplace(|v| v * s + m);
        }
        Ok(out)
    }

    fn check_columns(&self, ncols: usize) -> crate::Result<()> {
        if ncols != self.mean.len() {
            return Err(crate::ForecastError::Shape(format!(
                "scaler fitted on {} columns, got {}",
                self.mean.len(),
                ncols
            )));
        }
        Ok(())
    }
}
