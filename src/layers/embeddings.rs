/// Inverted (series-as-token) embedding
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::activations::CastedLinear;

/// Embeds every variate's whole input window as one token
///
/// `x [batch, seq_len, N]` and `x_mark [batch, seq_len, M]` become
/// `[batch, N + M, hidden]`: series tokens first, calendar tokens after.
pub struct InvertedEmbedding {
    value_proj: CastedLinear,
}

impl InvertedEmbedding {
    pub fn new(seq_len: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let value_proj = CastedLinear::new(seq_len, hidden_size, true, vb.pp("value_proj"))?;
        Ok(Self { value_proj })
    }

    pub fn forward(&self, x: &Tensor, x_mark: Option<&Tensor>) -> Result<Tensor> {
        let tokens = match x_mark {
            Some(marks) => Tensor::cat(&[x, marks], 2)?,
            None => x.clone(),
        };
        let tokens = tokens.transpose(1, 2)?.contiguous()?;
        self.value_proj.forward(&tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_token_layout() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let embed = InvertedEmbedding::new(12, 32, vb)?;
        let x = Tensor::randn(0f32, 1.0, (3, 12, 5), &device)?;
        let marks = Tensor::randn(0f32, 1.0, (3, 12, 4), &device)?;

        assert_eq!(embed.forward(&x, Some(&marks))?.dims(), &[3, 9, 32]);
        assert_eq!(embed.forward(&x, None)?.dims(), &[3, 5, 32]);

        Ok(())
    }
}
