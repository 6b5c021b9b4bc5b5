//! Generation building blocks shared by both decoding paths.
//!
//! This module contains:
//! - DistributionStrategy implementations for token selection
//! - Target-only autoregressive generation

pub mod autoregressive;
pub mod sampler;

pub use autoregressive::{autoregressive_generate, AutoregressiveOutput};
pub use sampler::{build_strategy, DistributionStrategy, GreedySampler, Sampler};
