//! Predictors.
//!
//! This module contains:
//! - The predictor call contract shared by drafter and target
//! - The auxiliary-context hook and its cross-attention implementation
//! - A table-driven bigram predictor

pub mod bigram;
pub mod multimodal;
pub mod predictor;

pub use bigram::BigramPredictor;
pub use multimodal::CrossAttentionContext;
pub use predictor::{
    AuxiliaryContext, AuxiliaryInputs, Predictor, PredictorOutput, DEFAULT_MAX_CONTEXT_LEN,
};
