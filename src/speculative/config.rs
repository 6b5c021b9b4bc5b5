//! Speculative decoding configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for speculative decoding.
///
/// The drafter proposes `num_speculative_tokens` tokens per step; the target
/// verifies them in a single forward pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculativeConfig {
    /// Number of tokens to speculate per iteration (gamma).
    /// Higher values can improve throughput if acceptance rate is high,
    /// but waste drafter calls when many tokens are rejected.
    pub num_speculative_tokens: usize,

    /// Maximum number of tokens to generate after the prompt.
    pub max_new_tokens: usize,

    /// End-of-sequence token ids. At least one is required.
    pub stop_token_ids: Vec<u32>,

    /// Placeholder for unfilled buffer slots. Falls back to the first stop token.
    pub pad_token_id: Option<u32>,

    /// Thread incremental state between predictor calls.
    pub use_cache: bool,

    /// Resample from the raw target distribution after a rejection instead of
    /// the residual `max(0, p - q)`. Breaks exactness; kept for experiments.
    pub skip_sample_adjustment: bool,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            num_speculative_tokens: 5,
            max_new_tokens: 40,
            stop_token_ids: Vec::new(),
            pad_token_id: None,
            use_cache: true,
            skip_sample_adjustment: false,
        }
    }
}

impl SpeculativeConfig {
    /// Create a config that stops on the given token ids.
    pub fn new(stop_token_ids: impl Into<Vec<u32>>) -> Self {
        Self {
            stop_token_ids: stop_token_ids.into(),
            ..Default::default()
        }
    }

    /// Set the number of speculative tokens.
    pub fn num_tokens(mut self, k: usize) -> Self {
        self.num_speculative_tokens = k;
        self
    }

    /// Set the generation length limit.
    pub fn max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    /// Set the pad token.
    pub fn pad_token(mut self, pad_token_id: u32) -> Self {
        self.pad_token_id = Some(pad_token_id);
        self
    }

    /// Enable or disable incremental state.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Enable or disable the residual correction after rejection.
    pub fn skip_sample_adjustment(mut self, skip: bool) -> Self {
        self.skip_sample_adjustment = skip;
        self
    }

    /// Resolved pad token id.
    pub fn resolved_pad_token_id(&self) -> Result<u32> {
        self.pad_token_id
            .or_else(|| self.stop_token_ids.first().copied())
            .ok_or_else(|| Error::Config("no pad token and no stop token to fall back to".into()))
    }

    /// Whether `token` ends generation.
    pub fn is_stop_token(&self, token: u32) -> bool {
        self.stop_token_ids.contains(&token)
    }

    /// Check the configuration before any predictor call.
    pub fn validate(&self) -> Result<()> {
        if self.num_speculative_tokens == 0 {
            return Err(Error::Config(
                "num_speculative_tokens must be at least 1".into(),
            ));
        }
        if self.stop_token_ids.is_empty() {
            return Err(Error::Config("at least one stop token id is required".into()));
        }
        Ok(())
    }
}
