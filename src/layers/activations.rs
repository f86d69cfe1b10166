/// Projections and gated feed-forward
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Affine projection over the last dimension
///
/// Weight is stored `[out_features, in_features]` under `weight`, bias under
/// `bias`; the parameter seeding in `utils` relies on those names.
pub struct CastedLinear {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl CastedLinear {
    /// Create new projection
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `bias` - Whether to include bias
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(in_features: usize, out_features: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_features, in_features),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;

        let bias = if bias {
            Some(vb.get_with_hints(out_features, "bias", Init::Const(0.0))?)
        } else {
            None
        };

        Ok(Self { weight, bias })
    }

    /// `input @ weight^T + bias`, casting parameters to the input dtype
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let weight = self.weight.to_dtype(input.dtype())?;
        let output = input.broadcast_matmul(&weight.t()?)?;

        match &self.bias {
            Some(b) => output.broadcast_add(&b.to_dtype(input.dtype())?),
            None => Ok(output),
        }
    }
}

/// SwiGLU feed-forward: `down(silu(gate) * up)`
pub struct SwiGLU {
    gate_up_proj: CastedLinear,
    down_proj: CastedLinear,
}

impl SwiGLU {
    /// # Arguments
    /// * `hidden_size` - Input/output dimension
    /// * `expansion` - Intermediate width as a multiple of `hidden_size`
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(hidden_size: usize, expansion: f32, vb: VarBuilder) -> Result<Self> {
        let inter = ((hidden_size as f32 * expansion).round() as usize).max(1);

        let gate_up_proj = CastedLinear::new(hidden_size, inter * 2, false, vb.pp("gate_up_proj"))?;
        let down_proj = CastedLinear::new(inter, hidden_size, false, vb.pp("down_proj"))?;

        Ok(Self {
            gate_up_proj,
            down_proj,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate_up = self.gate_up_proj.forward(x)?;

        let last_dim = gate_up.rank() - 1;
        let inter_size = gate_up.dim(last_dim)? / 2;
        let gate = gate_up.narrow(last_dim, 0, inter_size)?;
        let up = gate_up.narrow(last_dim, inter_size, inter_size)?;

        let gated = candle_nn::ops::silu(&gate)?.mul(&up)?;
        self.down_proj.forward(&gated)
    }
}
