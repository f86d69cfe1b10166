/// Forecast error metrics
use candle_core::{DType, Result, Tensor};

/// Mean squared error over all elements
pub fn mse(pred: &Tensor, real: &Tensor) -> Result<f64> {
    let diff = (pred - real)?.to_dtype(DType::F64)?;
    diff.sqr()?.mean_all()?.to_scalar::<f64>()
}

/// Mean absolute error over all elements
pub fn mae(pred: &Tensor, real: &Tensor) -> Result<f64> {
    let diff = (pred - real)?.to_dtype(DType::F64)?;
    diff.abs()?.mean_all()?.to_scalar::<f64>()
}

/// `(mse, mae)`
pub fn metric(pred: &Tensor, real: &Tensor) -> Result<(f64, f64)> {
    Ok((mse(pred, real)?, mae(pred, real)?))
}

/// Test metrics for every forecast horizon step
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HorizonMetrics {
    pub mse: Vec<f64>,
    pub mae: Vec<f64>,
}

impl HorizonMetrics {
    /// Score `preds` against `reals`, both `[samples, pred_len, num_nodes]`
    pub fn compute(preds: &Tensor, reals: &Tensor) -> crate::Result<Self> {
        if preds.dims() != reals.dims() {
            return Err(crate::ForecastError::Shape(format!(
                "predictions {:?} and targets {:?} differ",
                preds.dims(),
                reals.dims()
            )));
        }
        let (_, horizon, _) = preds.dims3()?;

        let mut out = Self {
            mse: Vec::with_capacity(horizon),
            mae: Vec::with_capacity(horizon),
        };
        for h in 0..horizon {
            let pred = preds.narrow(1, h, 1)?;
            let real = reals.narrow(1, h, 1)?;
            let (m, a) = metric(&pred, &real)?;
            log::debug!("Horizon {}: mse={:.4}, mae={:.4}", h + 1, m, a);
            out.mse.push(m);
            out.mae.push(a);
        }
        Ok(out)
    }

    pub fn horizon(&self) -> usize {
        self.mse.len()
    }

    /// MSE averaged over horizons
    pub fn avg_mse(&self) -> f64 {
        crate::utils::mean(&self.mse)
    }

    /// MAE averaged over horizons
    pub fn avg_mae(&self) -> f64 {
        crate::utils::mean(&self.mae)
    }
}
