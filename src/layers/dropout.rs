/// Dropout driven by a seeded generator
///
/// candle's own dropout draws from an unseeded CPU generator; masks here come
/// from a `StdRng` so two runs with the same seed see the same masks.
use std::cell::RefCell;

use candle_core::{Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SeededDropout {
    p: f32,
    rng: RefCell<StdRng>,
}

impl SeededDropout {
    pub fn new(p: f32, seed: u64) -> Self {
        Self {
            p,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Zero each element with probability `p` and rescale the rest by
    /// `1 / (1 - p)`; identity when `train` is false
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.p <= 0.0 {
            return Ok(x.clone());
        }

        let keep = 1.0 - self.p;
        let scale = 1.0 / keep;
        let mask: Vec<f32> = {
            let mut rng = self.rng.borrow_mut();
            (0..x.elem_count())
                .map(|_| if rng.gen::<f32>() < keep { scale } else { 0.0 })
                .collect()
        };

        let mask = Tensor::from_vec(mask, x.dims(), x.device())?.to_dtype(x.dtype())?;
        x.mul(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_eval_is_identity() -> Result<()> {
        let device = Device::Cpu;
        let dropout = SeededDropout::new(0.5, 7);
        let x = Tensor::randn(0f32, 1.0, (4, 8), &device)?;

        let out = dropout.forward(&x, false)?;
        let diff = (out - &x)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);

        Ok(())
    }

    #[test]
    fn test_same_seed_same_mask() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::ones((16, 16), DType::F32, &device)?;

        let a = SeededDropout::new(0.3, 42).forward(&x, true)?;
        let b = SeededDropout::new(0.3, 42).forward(&x, true)?;

        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);

        Ok(())
    }

    #[test]
    fn test_kept_values_rescaled() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::ones((64, 64), DType::F32, &device)?;

        let out = SeededDropout::new(0.5, 3).forward(&x, true)?;
        let values = out.flatten_all()?.to_vec1::<f32>()?;

        assert!(values.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        let kept = values.iter().filter(|&&v| v > 0.0).count() as f32 / values.len() as f32;
        assert!((kept - 0.5).abs() < 0.05);

        Ok(())
    }
}
