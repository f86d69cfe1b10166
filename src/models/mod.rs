/// Dual forecaster: language-model-sized context path + student encoder
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};

use crate::layers::{Attention, CastedLinear, InvertedEmbedding, RMSNorm, SeededDropout, SwiGLU};
use crate::RunConfig;

/// Parameter-name prefix of the context path
pub const CONTEXT_PREFIX: &str = "context.";

/// Hyperparameters of the Dual model
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DualConfig {
    /// Number of series in every window
    pub num_nodes: usize,
    /// Input window length
    pub seq_len: usize,
    /// Forecast horizon
    pub pred_len: usize,
    /// Calendar features per time step
    pub mark_dim: usize,
    /// Student width
    pub channel: usize,
    /// Context-path width
    pub d_llm: usize,
    /// Context-path blocks
    pub l_layer: usize,
    /// Student blocks
    pub e_layer: usize,
    /// Attention heads (both paths)
    pub head: usize,
    /// Dropout probability
    pub dropout: f32,
    /// Feed-forward width as a multiple of the block width
    pub ffn_expansion: f32,
    /// Exclude the context path from optimisation
    pub freeze_context: bool,
    /// Seed for parameter initialisation and dropout masks
    pub seed: u64,
}

impl DualConfig {
    pub fn from_run_config(config: &RunConfig, mark_dim: usize) -> Self {
        Self {
            num_nodes: config.num_nodes,
            seq_len: config.seq_len,
            pred_len: config.pred_len,
            mark_dim,
            channel: config.channel,
            d_llm: config.d_llm,
            l_layer: config.l_layer,
            e_layer: config.e_layer,
            head: config.head,
            dropout: config.dropout_n as f32,
            ffn_expansion: 2.0,
            freeze_context: config.freeze_llm,
            seed: config.seed,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.head == 0 || self.channel % self.head != 0 || self.d_llm % self.head != 0 {
            return Err(crate::ForecastError::Config(format!(
                "channel ({}) and d_llm ({}) must be divisible by head ({})",
                self.channel, self.d_llm, self.head
            )));
        }
        if self.num_nodes == 0 || self.seq_len == 0 || self.pred_len == 0 {
            return Err(crate::ForecastError::Config(
                "num_nodes, seq_len and pred_len must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Distinct, reproducible seed per dropout site
fn stream_seed(seed: u64, stream: u64) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(stream)
}

/// Encoder block: self-attention and SwiGLU, each with a post-norm residual
pub struct EncoderBlock {
    self_attn: Attention,
    mlp: SwiGLU,
    attn_norm: RMSNorm,
    mlp_norm: RMSNorm,
    dropout: SeededDropout,
}

impl EncoderBlock {
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        expansion: f32,
        dropout: f32,
        seed: u64,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        Ok(Self {
            self_attn: Attention::new(hidden_size, num_heads, vb.pp("self_attn"))?,
            mlp: SwiGLU::new(hidden_size, expansion, vb.pp("mlp"))?,
            attn_norm: RMSNorm::new(hidden_size, 1e-5, vb.pp("attn_norm"))?,
            mlp_norm: RMSNorm::new(hidden_size, 1e-5, vb.pp("mlp_norm"))?,
            dropout: SeededDropout::new(dropout, seed),
        })
    }

    /// `[batch, tokens, hidden] -> [batch, tokens, hidden]`
    pub fn forward(&self, hidden_states: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let attn_out = self.self_attn.forward(hidden_states)?;
        let hidden_states = self
            .attn_norm
            .forward(&(hidden_states + self.dropout.forward(&attn_out, train)?)?)?;

        let mlp_out = self.mlp.forward(&hidden_states)?;
        self.mlp_norm
            .forward(&(hidden_states + self.dropout.forward(&mlp_out, train)?)?)
    }
}

/// Stack of encoder blocks
pub struct Encoder {
    layers: Vec<EncoderBlock>,
}

impl Encoder {
    pub fn new(
        num_layers: usize,
        hidden_size: usize,
        config: &DualConfig,
        seed: u64,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            layers.push(EncoderBlock::new(
                hidden_size,
                config.head,
                config.ffn_expansion,
                config.dropout,
                stream_seed(seed, i as u64),
                vb.pp(format!("layer_{}", i)),
            )?);
        }
        Ok(Self { layers })
    }

    pub fn forward(&self, hidden_states: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut hidden_states = hidden_states.clone();
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, train)?;
        }
        Ok(hidden_states)
    }
}

/// The Dual forecaster
///
/// Each series (and each calendar column) of the input window is one token.
/// The student path embeds tokens at width `channel`; the context path embeds
/// the same tokens at the language-model width `d_llm` and is projected back
/// to `channel` before the two are fused. A linear head maps every fused
/// token to `pred_len` future values. Inputs are instance-normalised over
/// time and predictions mapped back to the input scale.
pub struct Dual {
    config: DualConfig,
    varmap: VarMap,

    student_embed: InvertedEmbedding,
    student: Encoder,

    context_embed: InvertedEmbedding,
    context: Encoder,
    align: CastedLinear,

    embed_dropout: SeededDropout,
    norm: RMSNorm,
    head: CastedLinear,
}

impl Dual {
    /// Build the model with freshly seeded parameters on `device`
    pub fn new(config: DualConfig, device: &Device) -> crate::Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let student_embed = InvertedEmbedding::new(config.seq_len, config.channel, vb.pp("student.embed"))?;
        let student = Encoder::new(
            config.e_layer,
            config.channel,
            &config,
            stream_seed(config.seed, 100),
            vb.pp("student.encoder"),
        )?;

        let context_embed = InvertedEmbedding::new(config.seq_len, config.d_llm, vb.pp("context.embed"))?;
        let context = Encoder::new(
            config.l_layer,
            config.d_llm,
            &config,
            stream_seed(config.seed, 200),
            vb.pp("context.encoder"),
        )?;
        let align = CastedLinear::new(config.d_llm, config.channel, true, vb.pp("context.align"))?;

        let norm = RMSNorm::new(config.channel, 1e-5, vb.pp("norm"))?;
        let head = CastedLinear::new(config.channel, config.pred_len, true, vb.pp("head"))?;

        crate::utils::seed_parameters(&varmap, config.seed)?;

        let embed_dropout = SeededDropout::new(config.dropout, stream_seed(config.seed, 0));

        Ok(Self {
            config,
            varmap,
            student_embed,
            student,
            context_embed,
            context,
            align,
            embed_dropout,
            norm,
            head,
        })
    }

    pub fn config(&self) -> &DualConfig {
        &self.config
    }

    /// Parameter registry (used for checkpointing)
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    /// Variables the optimiser updates, in name order
    pub fn trainable_vars(&self) -> Vec<Var> {
        crate::utils::named_vars(&self.varmap)
            .into_iter()
            .filter(|(name, _)| !(self.config.freeze_context && name.starts_with(CONTEXT_PREFIX)))
            .map(|(_, var)| var)
            .collect()
    }

    /// Total number of parameters
    pub fn param_num(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| crate::utils::count_parameters(v.as_tensor()))
            .sum()
    }

    /// Number of parameters the optimiser updates
    pub fn count_trainable_params(&self) -> usize {
        self.trainable_vars()
            .iter()
            .map(|v| crate::utils::count_parameters(v.as_tensor()))
            .sum()
    }

    /// Check that a batch matches the configured dimensions
    pub fn check_batch(
        &self,
        x: &Tensor,
        y: &Tensor,
        x_mark: &Tensor,
        y_mark: &Tensor,
    ) -> crate::Result<()> {
        let c = &self.config;
        let dims = |t: &Tensor, name: &str| -> crate::Result<(usize, usize, usize)> {
            t.dims3().map_err(|_| {
                crate::ForecastError::Shape(format!(
                    "{} must be [batch, time, features], got {:?}",
                    name,
                    t.dims()
                ))
            })
        };

        let (b, x_len, x_nodes) = dims(x, "x")?;
        let expected = [
            ("x", (b, x_len, x_nodes), (b, c.seq_len, c.num_nodes)),
            ("y", dims(y, "y")?, (b, c.pred_len, c.num_nodes)),
            ("x_mark", dims(x_mark, "x_mark")?, (b, c.seq_len, c.mark_dim)),
            ("y_mark", dims(y_mark, "y_mark")?, (b, c.pred_len, c.mark_dim)),
        ];

        for (name, got, want) in expected {
            if got != want {
                return Err(crate::ForecastError::Shape(format!(
                    "{} has shape {:?}, expected {:?}",
                    name, got, want
                )));
            }
        }
        Ok(())
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input window [batch, seq_len, num_nodes]
    /// * `y` - Target window [batch, pred_len, num_nodes] (shape contract only)
    /// * `x_mark`, `y_mark` - Calendar marks for the two windows
    /// * `train` - Enables dropout
    ///
    /// # Returns
    /// Prediction shaped like `y`
    pub fn forward(
        &self,
        x: &Tensor,
        y: &Tensor,
        x_mark: &Tensor,
        y_mark: &Tensor,
        train: bool,
    ) -> crate::Result<Tensor> {
        self.check_batch(x, y, x_mark, y_mark)?;
        let num_nodes = self.config.num_nodes;

        // Instance normalisation over time: [batch, 1, num_nodes]
        let mean = x.mean_keepdim(1)?;
        let centered = x.broadcast_sub(&mean)?;
        let std = (centered.sqr()?.mean_keepdim(1)? + 1e-5)?.sqrt()?;
        let x_norm = centered.broadcast_div(&std)?;

        // Student path: [batch, N + M, channel]
        let student = self.student_embed.forward(&x_norm, Some(x_mark))?;
        let student = self.embed_dropout.forward(&student, train)?;
        let student = self.student.forward(&student, train)?;

        // Context path: [batch, N + M, d_llm] -> [batch, N + M, channel]
        let context = self.context_embed.forward(&x_norm, Some(x_mark))?;
        let context = self.context.forward(&context, train)?;
        let context = self.align.forward(&context)?;

        let fused = self.norm.forward(&(student + context)?)?;

        // [batch, N + M, pred_len] -> series tokens only -> [batch, pred_len, N]
        let out = self.head.forward(&fused)?;
        let out = out.narrow(1, 0, num_nodes)?.transpose(1, 2)?.contiguous()?;

        Ok(out.broadcast_mul(&std)?.broadcast_add(&mean)?)
    }
}
