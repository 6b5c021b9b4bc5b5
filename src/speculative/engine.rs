//! Speculative decoding engine.
//!
//! Orchestrates draft model, target model, and rejection sampling
//! for faster token generation.

use tracing::{debug, info};

use super::config::SpeculativeConfig;
use super::draft::propose;
use super::sampler::{correction_distribution, RejectionSampler};
use super::verify::verify;
use crate::core::kv_cache::prune_cache;
use crate::core::sequence::{FinishReason, SequenceBuffer};
use crate::engine::sampler::DistributionStrategy;
use crate::error::{Error, Result};
use crate::model::predictor::{generation_capacity, AuxiliaryContext, ForwardOptions, Predictor};

/// Running totals of proposed and accepted draft tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptanceStats {
    /// Draft tokens accepted by the target.
    pub drafts_accepted: usize,
    /// Draft tokens proposed.
    pub drafts_speculated: usize,
}

impl AcceptanceStats {
    /// Record one verification round.
    pub fn record(&mut self, speculated: usize, accepted: usize) {
        debug_assert!(accepted <= speculated);
        self.drafts_speculated += speculated;
        self.drafts_accepted += accepted;
    }

    /// `drafts_accepted / drafts_speculated`, or 0 before any draft was proposed.
    pub fn acceptance_rate(&self) -> f64 {
        if self.drafts_speculated == 0 {
            0.0
        } else {
            self.drafts_accepted as f64 / self.drafts_speculated as f64
        }
    }
}

/// What happened in one draft/verify step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepStats {
    /// Tokens drafted (`k`).
    pub drafted: usize,
    /// Tokens accepted (`n`).
    pub accepted: usize,
    /// Positions dropped from the drafter cache.
    pub drafter_pruned: usize,
    /// Positions dropped from the target cache.
    pub target_pruned: usize,
    /// A stop token inside the accepted prefix ended generation.
    pub stopped_in_draft: bool,
}

/// Result of a generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Generated token ids (prompt excluded).
    pub tokens: Vec<u32>,
    /// `drafts_accepted / drafts_speculated`, 0 when nothing was speculated.
    pub acceptance_rate: f64,
    /// Final counters.
    pub stats: AcceptanceStats,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// One entry per draft/verify step.
    pub steps: Vec<StepStats>,
}

/// Speculative decoding engine.
///
/// Coordinates between a small draft model and a large target model
/// to accelerate autoregressive text generation.
///
/// ## Workflow
///
/// 1. **Prefill**: One target call over the prompt seeds its cache and yields the first token
/// 2. **Draft**: Generate `k` tokens with the fast draft model
/// 3. **Verify**: Run target model on all tokens in one forward pass
/// 4. **Correct**: Prune caches on rejection, draw the correction or bonus token
/// 5. **Commit**: Blank rejected drafts, finalize `n + 1` tokens
///
/// ## Example
///
/// ```text
/// Input:  [The, quick, brown]
/// Draft:  [fox, jumps, over, the]     <- 4 speculative tokens
/// Target: Verify all 5 positions      <- 1 forward pass
/// Result: [fox, jumps, over, a]       <- 3 accepted + 1 resampled
/// ```
pub struct SpeculativeEngine<D: Predictor, T: Predictor> {
    /// Large target model (ground truth).
    target_model: T,
    /// Small draft model (fast approximation).
    draft_model: D,
    /// Configuration.
    config: SpeculativeConfig,
    /// Rejection sampler.
    rejection_sampler: RejectionSampler,
}

impl<D: Predictor, T: Predictor> SpeculativeEngine<D, T> {
    /// Create a new speculative engine.
    ///
    /// # Arguments
    ///
    /// * `target_model` - Large model for verification
    /// * `draft_model` - Small model for drafting, same vocabulary
    /// * `config` - Speculative decoding configuration
    pub fn new(target_model: T, draft_model: D, config: SpeculativeConfig) -> Result<Self> {
        Self::with_rejection_sampler(target_model, draft_model, config, RejectionSampler::new())
    }

    /// Create with a seeded rejection sampler for reproducibility.
    pub fn with_seed(
        target_model: T,
        draft_model: D,
        config: SpeculativeConfig,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rejection_sampler(
            target_model,
            draft_model,
            config,
            RejectionSampler::with_seed(seed),
        )
    }

    fn with_rejection_sampler(
        target_model: T,
        draft_model: D,
        config: SpeculativeConfig,
        rejection_sampler: RejectionSampler,
    ) -> Result<Self> {
        config.validate()?;
        if draft_model.vocab_size() != target_model.vocab_size() {
            return Err(Error::VocabMismatch {
                draft: draft_model.vocab_size(),
                target: target_model.vocab_size(),
            });
        }
        Ok(Self {
            target_model,
            draft_model,
            config,
            rejection_sampler,
        })
    }

    /// Generate until a stop token or the buffer end.
    ///
    /// `aux` supplies extra predictor inputs for multimodal models.
    pub fn generate(
        &mut self,
        prompt: &[u32],
        strategy: &mut dyn DistributionStrategy,
        aux: Option<&dyn AuxiliaryContext>,
    ) -> Result<GenerationOutput> {
        let mut session = self.start(prompt, strategy, aux)?;
        while session.step()?.is_none() {}
        Ok(session.finish())
    }

    /// Allocate the buffer and run the prefill.
    ///
    /// The returned session is advanced with [`SpeculativeSession::step`]; the
    /// caller may stop between steps.
    pub fn start<'a>(
        &'a mut self,
        prompt: &[u32],
        strategy: &'a mut dyn DistributionStrategy,
        aux: Option<&'a dyn AuxiliaryContext>,
    ) -> Result<SpeculativeSession<'a, D, T>> {
        let capacity = generation_capacity(
            self.target_model.max_context_len(),
            prompt.len(),
            self.config.max_new_tokens,
        );
        let buffer = SequenceBuffer::new(prompt, capacity, self.config.resolved_pad_token_id()?)?;
        let options = ForwardOptions {
            use_cache: self.config.use_cache,
            prompt_len: buffer.prompt_len(),
            aux,
        };

        let mut session = SpeculativeSession {
            engine: self,
            strategy,
            options,
            buffer,
            draft_cache: None,
            target_cache: None,
            stats: AcceptanceStats::default(),
            steps: Vec::new(),
            finish_reason: None,
        };
        session.prefill()?;
        Ok(session)
    }

    /// Get the speculative configuration.
    pub fn config(&self) -> &SpeculativeConfig {
        &self.config
    }

    /// Get reference to the target model.
    pub fn target_model(&self) -> &T {
        &self.target_model
    }

    /// Get mutable reference to the target model.
    pub fn target_model_mut(&mut self) -> &mut T {
        &mut self.target_model
    }

    /// Get reference to the draft model.
    pub fn draft_model(&self) -> &D {
        &self.draft_model
    }

    /// Get mutable reference to the draft model.
    pub fn draft_model_mut(&mut self) -> &mut D {
        &mut self.draft_model
    }
}

/// State of one generation call.
///
/// Owns the buffer, both caches and the counters for the duration of the call.
pub struct SpeculativeSession<'a, D: Predictor, T: Predictor> {
    engine: &'a mut SpeculativeEngine<D, T>,
    strategy: &'a mut dyn DistributionStrategy,
    options: ForwardOptions<'a>,
    buffer: SequenceBuffer,
    draft_cache: Option<D::Cache>,
    target_cache: Option<T::Cache>,
    stats: AcceptanceStats,
    steps: Vec<StepStats>,
    finish_reason: Option<FinishReason>,
}

impl<'a, D: Predictor, T: Predictor> SpeculativeSession<'a, D, T> {
    /// The token buffer.
    pub fn buffer(&self) -> &SequenceBuffer {
        &self.buffer
    }

    /// Counters so far.
    pub fn stats(&self) -> AcceptanceStats {
        self.stats
    }

    /// Set once generation has ended.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Single target call over the prompt: seeds its cache and yields the first token.
    fn prefill(&mut self) -> Result<()> {
        if self.buffer.is_full() {
            self.finish_reason = Some(FinishReason::MaxTokens);
            return Ok(());
        }

        let cursor = self.buffer.cursor();
        let out = self.options.forward(
            &mut self.engine.target_model,
            self.buffer.window(cursor),
            None,
        )?;
        let probs = self.strategy.transform(&out.last_row()?)?;
        let token = self.strategy.sample(&probs)?;
        self.target_cache = out.cache;

        self.buffer.write(cursor, token);
        self.buffer.advance(1);
        debug!(position = cursor, token, "prefill");

        if self.engine.config.is_stop_token(token) {
            self.finish_reason = Some(FinishReason::EndOfSequence);
        } else if self.buffer.is_full() {
            self.finish_reason = Some(FinishReason::MaxTokens);
        }
        Ok(())
    }

    /// Run one draft/verify/correct/commit iteration.
    ///
    /// Returns the finish reason once generation has ended, `None` otherwise.
    pub fn step(&mut self) -> Result<Option<FinishReason>> {
        if self.finish_reason.is_some() {
            return Ok(self.finish_reason);
        }

        let config = &self.engine.config;
        let cursor = self.buffer.cursor();
        // One slot is always kept for the correction/bonus token.
        let k = config
            .num_speculative_tokens
            .min(self.buffer.remaining() - 1);
        let use_cache = config.use_cache;
        let skip_adjustment = config.skip_sample_adjustment;

        // Draft
        let (draft, draft_cache) = propose(
            &mut self.engine.draft_model,
            self.draft_cache.take(),
            &mut self.buffer,
            k,
            &mut *self.strategy,
            &self.options,
        )?;

        // Verify
        let (verification, target_cache) = verify(
            &mut self.engine.target_model,
            self.target_cache.take(),
            &self.buffer,
            &draft,
            &*self.strategy,
            &mut self.engine.rejection_sampler,
            &self.options,
        )?;
        let n = verification.accepted;
        self.stats.record(k, n);

        let mut step = StepStats {
            drafted: k,
            accepted: n,
            drafter_pruned: 0,
            target_pruned: 0,
            stopped_in_draft: false,
        };

        let stop_offset = self
            .buffer
            .slice(cursor, cursor + n)
            .iter()
            .position(|&t| self.engine.config.is_stop_token(t));
        if let Some(offset) = stop_offset {
            self.buffer.fill_pad(cursor + offset + 1, cursor + k);
            self.buffer.advance(offset + 1);
            self.draft_cache = draft_cache;
            self.target_cache = target_cache;
            step.stopped_in_draft = true;
            return Ok(self.end_step(step, Some(FinishReason::EndOfSequence)));
        }

        // Correct
        let (draft_cache, target_cache) = if n < k && use_cache {
            step.drafter_pruned = k - n;
            step.target_pruned = k - n + 1;
            (
                prune_cache(draft_cache, step.drafter_pruned)?,
                prune_cache(target_cache, step.target_pruned)?,
            )
        } else {
            (draft_cache, target_cache)
        };
        self.draft_cache = draft_cache;
        self.target_cache = target_cache;

        let correction = correction_distribution(
            &verification.target_probs,
            &draft.probs,
            n,
            skip_adjustment,
        )?;
        let token = self.strategy.sample(&correction)?;

        // Commit
        self.buffer.fill_pad(cursor + n, cursor + k);
        self.buffer.write(cursor + n, token);
        self.buffer.advance(n + 1);

        let finish = if self.engine.config.is_stop_token(token) {
            Some(FinishReason::EndOfSequence)
        } else if self.buffer.is_full() {
            Some(FinishReason::MaxTokens)
        } else {
            None
        };
        Ok(self.end_step(step, finish))
    }

    fn end_step(&mut self, step: StepStats, finish: Option<FinishReason>) -> Option<FinishReason> {
        debug!(
            cursor = self.buffer.cursor(),
            drafted = step.drafted,
            accepted = step.accepted,
            drafter_pruned = step.drafter_pruned,
            target_pruned = step.target_pruned,
            "speculative step"
        );
        self.steps.push(step);
        self.finish_reason = finish;
        finish
    }

    /// Consume the session and return what was generated.
    ///
    /// A session finished early by the caller reports [`FinishReason::Aborted`].
    pub fn finish(self) -> GenerationOutput {
        let finish_reason = self.finish_reason.unwrap_or(FinishReason::Aborted);
        let acceptance_rate = self.stats.acceptance_rate();

        info!(
            generated = self.buffer.output().len(),
            steps = self.steps.len(),
            drafts_accepted = self.stats.drafts_accepted,
            drafts_speculated = self.stats.drafts_speculated,
            acceptance_rate,
            finish_reason = finish_reason.as_str(),
            "speculative generation finished"
        );

        GenerationOutput {
            tokens: self.buffer.output().to_vec(),
            acceptance_rate,
            stats: self.stats,
            finish_reason,
            steps: self.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_rate_before_any_draft_is_zero() {
        assert_eq!(AcceptanceStats::default().acceptance_rate(), 0.0);
    }

    #[test]
    fn test_acceptance_stats_accumulate() {
        let mut stats = AcceptanceStats::default();
        stats.record(3, 3);
        stats.record(3, 0);
        stats.record(2, 1);

        assert_eq!(stats.drafts_speculated, 8);
        assert_eq!(stats.drafts_accepted, 4);
        assert!((stats.acceptance_rate() - 0.5).abs() < 1e-12);
    }
}
