/// Neural network layer primitives
///
/// Building blocks for the Dual forecaster:
/// - Attention across variate tokens
/// - Inverted (series-as-token) embedding
/// - Projections and SwiGLU feed-forward
/// - RMS normalization
/// - Seeded dropout

pub mod activations;
pub mod attention;
pub mod dropout;
pub mod embeddings;
pub mod normalization;

pub use activations::{CastedLinear, SwiGLU};
pub use attention::Attention;
pub use dropout::SeededDropout;
pub use embeddings::InvertedEmbedding;
pub use normalization::RMSNorm;
