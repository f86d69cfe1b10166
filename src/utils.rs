/// Parameter utilities shared by the model and the training engine
use candle_core::{Result, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draw from a standard normal truncated to `[-bound, bound]`
pub fn trunc_normal(rng: &mut StdRng, bound: f64) -> f64 {
    loop {
        // Box-Muller
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        if z.abs() <= bound {
            return z;
        }
    }
}

/// All variables of a `VarMap`, sorted by name
pub fn named_vars(varmap: &VarMap) -> Vec<(String, Var)> {
    let data = match varmap.data().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let mut vars: Vec<(String, Var)> = data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

/// Re-initialise every variable from `seed`
///
/// Biases start at zero, vectors (norm scales) at one, and matrices from a
/// truncated normal with std `1 / sqrt(fan_in)`. Variables are visited in
/// name order so the result depends on the seed alone.
pub fn seed_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);

    for (name, var) in named_vars(varmap) {
        let dims = var.dims().to_vec();
        let numel: usize = dims.iter().product();

        let values: Vec<f32> = if name.ends_with("bias") {
            vec![0.0; numel]
        } else if dims.len() < 2 {
            vec![1.0; numel]
        } else {
            let fan_in = dims[dims.len() - 1].max(1);
            let std = 1.0 / (fan_in as f64).sqrt();
            (0..numel)
                .map(|_| (trunc_normal(&mut rng, 2.0) * std) as f32)
                .collect()
        };

        let init = Tensor::from_vec(values, dims, var.device())?.to_dtype(var.dtype())?;
        var.set(&init)?;
    }

    Ok(())
}

/// Calculate the number of parameters in a tensor
pub fn count_parameters(tensor: &Tensor) -> usize {
    tensor.dims().iter().product()
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
