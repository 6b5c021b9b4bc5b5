//! nano-specdec: draft-verify speculative decoding in Rust.
//!
//! A small drafter proposes several tokens, a large target scores them in one
//! pass, and rejection sampling keeps the output distributed exactly as the
//! target alone would produce it:
//! - Fixed-capacity sequence buffer shared by both predictors
//! - Cache pruning after rejected drafts
//! - Pluggable distribution strategies (greedy, temperature/top-k/top-p)
//! - Auxiliary inputs for multimodal predictors
//! - A target-only autoregressive baseline

pub mod config;
pub mod error;

pub mod core;
pub mod engine;
pub mod model;
pub mod speculative;

pub use config::{GenerationConfig, SamplingConfig};
pub use core::{FinishReason, KVCache, PrunableCache, SequenceBuffer};
pub use engine::{
    autoregressive_generate, build_strategy, AutoregressiveOutput, DistributionStrategy,
    GreedySampler, Sampler,
};
pub use error::{Error, Result};
pub use model::{
    AuxiliaryContext, AuxiliaryInputs, BigramPredictor, CrossAttentionContext, Predictor,
    PredictorOutput,
};
pub use speculative::{
    AcceptanceStats, GenerationOutput, RejectionSampler, SpeculativeConfig, SpeculativeEngine,
    SpeculativeSession, StepStats,
};
