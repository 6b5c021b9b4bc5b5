//! Speculative decoding.
//!
//! This module implements draft-verify speculative decoding
//! for faster token generation.
//!
//! ## How it works
//!
//! 1. **Draft Phase**: A small, fast drafter proposes K tokens one at a time.
//!
//! 2. **Verify Phase**: The target processes all K+1 positions in a single
//!    forward pass.
//!
//! 3. **Rejection Sampling**: Each draft token is accepted or rejected based on
//!    the probability ratio between target and draft distributions.
//!
//! 4. **Correction**: Rejected positions are pruned from both caches and one
//!    token is drawn from the residual (or bonus) distribution.
//!
//! ## Example
//!
//! ```text
//! Draft (K=4):     [prompt] -> t1 -> t2 -> t3 -> t4
//! Target verify:   [prompt, t1, t2, t3, t4] -> logits for all 5 positions
//! Rejection:       Accept t1, t2, reject t3, resample -> final: t1, t2, t3'
//! ```

pub mod config;
pub mod draft;
pub mod engine;
pub mod sampler;
pub mod verify;

pub use config::SpeculativeConfig;
pub use draft::{propose, DraftRecord};
pub use engine::{
    AcceptanceStats, GenerationOutput, SpeculativeEngine, SpeculativeSession, StepStats,
};
pub use sampler::{correction_distribution, residual_distribution, RejectionSampler};
pub use verify::{verify, VerificationRecord};
