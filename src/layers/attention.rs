/// Multi-head self-attention across variate tokens
///
/// Tokens are whole series (plus calendar columns), so attention mixes
/// information between variates rather than between time steps. No mask is
/// applied.
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use super::activations::CastedLinear;

pub struct Attention {
    head_dim: usize,
    num_heads: usize,
    qkv_proj: CastedLinear,
    o_proj: CastedLinear,
}

impl Attention {
    /// Create new Attention layer
    ///
    /// # Arguments
    /// * `hidden_size` - Input/output dimension (divisible by `num_heads`)
    /// * `num_heads` - Number of heads
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(hidden_size: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            candle_core::bail!(
                "hidden_size {} is not divisible by num_heads {}",
                hidden_size,
                num_heads
            );
        }
        let head_dim = hidden_size / num_heads;

        let qkv_proj = CastedLinear::new(hidden_size, 3 * hidden_size, true, vb.pp("qkv_proj"))?;
        let o_proj = CastedLinear::new(hidden_size, hidden_size, true, vb.pp("o_proj"))?;

        Ok(Self {
            head_dim,
            num_heads,
            qkv_proj,
            o_proj,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `hidden_states` - Input tensor [batch, tokens, hidden_size]
    ///
    /// # Returns
    /// Output tensor [batch, tokens, hidden_size]
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let (batch_size, tokens, hidden_size) = hidden_states.dims3()?;

        // [batch, tokens, 3 * hidden] -> [batch, tokens, 3, heads, head_dim]
        let qkv = self.qkv_proj.forward(hidden_states)?;
        let qkv = qkv.reshape((batch_size, tokens, 3, self.num_heads, self.head_dim))?;

        // -> [batch, heads, tokens, head_dim]
        let query = qkv.narrow(2, 0, 1)?.squeeze(2)?.transpose(1, 2)?.contiguous()?;
        let key = qkv.narrow(2, 1, 1)?.squeeze(2)?.transpose(1, 2)?.contiguous()?;
        let value = qkv.narrow(2, 2, 1)?.squeeze(2)?.transpose(1, 2)?.contiguous()?;

        let attn_output = scaled_dot_product_attention(&query, &key, &value)?;

        // [batch, heads, tokens, head_dim] -> [batch, tokens, hidden]
        let attn_output = attn_output
            .transpose(1, 2)?
            .reshape((batch_size, tokens, hidden_size))?;

        self.o_proj.forward(&attn_output)
    }
}

/// softmax(Q @ K^T / sqrt(d_k)) @ V
fn scaled_dot_product_attention(query: &Tensor, key: &Tensor, value: &Tensor) -> Result<Tensor> {
    let head_dim = query.dim(3)?;
    let scale = 1.0 / (head_dim as f64).sqrt();

    let scores = (query.matmul(&key.t()?)? * scale)?;
    let attn_weights = candle_nn::ops::softmax_last_dim(&scores)?;

    attn_weights.matmul(value)
}
