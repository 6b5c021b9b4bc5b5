//! Target-only autoregressive generation.
//!
//! One target call per token, using the same buffer, cache, stop and pad
//! conventions as the speculative loop. Serves as the reference the
//! speculative output is compared against.

use tracing::{debug, info};

use super::sampler::DistributionStrategy;
use crate::core::sequence::{FinishReason, SequenceBuffer};
use crate::error::{Error, Result};
use crate::model::predictor::{generation_capacity, AuxiliaryContext, ForwardOptions, Predictor};
use crate::speculative::SpeculativeConfig;

/// Output of [`autoregressive_generate`].
#[derive(Debug, Clone)]
pub struct AutoregressiveOutput {
    /// Generated token ids (prompt excluded).
    pub tokens: Vec<u32>,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Number of target calls.
    pub target_calls: usize,
}

/// Generate with the target alone.
///
/// `config.num_speculative_tokens` and `config.skip_sample_adjustment` are ignored.
pub fn autoregressive_generate<P: Predictor>(
    target: &mut P,
    prompt: &[u32],
    config: &SpeculativeConfig,
    strategy: &mut dyn DistributionStrategy,
    aux: Option<&dyn AuxiliaryContext>,
) -> Result<AutoregressiveOutput> {
    if config.stop_token_ids.is_empty() {
        return Err(Error::Config("at least one stop token id is required".into()));
    }
    let capacity =
        generation_capacity(target.max_context_len(), prompt.len(), config.max_new_tokens);
    let mut buffer = SequenceBuffer::new(prompt, capacity, config.resolved_pad_token_id()?)?;
    let options = ForwardOptions {
        use_cache: config.use_cache,
        prompt_len: buffer.prompt_len(),
        aux,
    };
    let mut cache: Option<P::Cache> = None;
    let mut target_calls = 0;
    let mut finish_reason = FinishReason::MaxTokens;

    while !buffer.is_full() {
        let window_len = buffer.cursor();
        let out = options.forward(target, buffer.window(window_len), cache.take())?;
        target_calls += 1;

        let probs = strategy.transform(&out.last_row()?)?;
        let token = strategy.sample(&probs)?;
        cache = out.cache;

        buffer.write(window_len, token);
        buffer.advance(1);
        debug!(position = window_len, token, "autoregressive token");

        if config.is_stop_token(token) {
            finish_reason = FinishReason::EndOfSequence;
            break;
        }
    }

    info!(
        generated = buffer.output().len(),
        target_calls,
        finish_reason = finish_reason.as_str(),
        "autoregressive generation finished"
    );

    Ok(AutoregressiveOutput {
        tokens: buffer.output().to_vec(),
        finish_reason,
        target_calls,
    })
}
