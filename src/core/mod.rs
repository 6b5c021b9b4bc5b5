//! Core infrastructure for nano-specdec.
//!
//! This module contains the fundamental building blocks:
//! - SequenceBuffer for the fixed-capacity token array
//! - KVCache and the PrunableCache trait for incremental predictor state

pub mod kv_cache;
pub mod sequence;

pub use kv_cache::{prune_cache, KVCache, LayerKVCache, PrunableCache};
pub use sequence::{FinishReason, SequenceBuffer};
