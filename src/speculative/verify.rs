//! Verify phase: one target pass over the drafted window.

use candle_core::Tensor;

use super::draft::DraftRecord;
use super::sampler::RejectionSampler;
use crate::core::sequence::SequenceBuffer;
use crate::engine::sampler::DistributionStrategy;
use crate::error::Result;
use crate::model::predictor::{ForwardOptions, Predictor};

/// Target distributions aligned with the draft, plus the accepted prefix length.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    /// `[k + 1, vocab_size]`: rows `0..k` are `p_0..p_{k-1}`, row `k` is the
    /// bonus distribution following the last draft.
    pub target_probs: Tensor,
    /// Accepted prefix length `n` in `[0, k]`.
    pub accepted: usize,
}

/// Run the target over `[0, cursor + k)` and decide how many drafts to keep.
///
/// Row `cursor - 1 + i` of the target output predicts draft position `i`, so
/// the `k + 1` rows starting at `cursor - 1` cover every draft plus the bonus
/// position.
pub fn verify<T: Predictor>(
    target: &mut T,
    cache: Option<T::Cache>,
    buffer: &SequenceBuffer,
    draft: &DraftRecord,
    strategy: &dyn DistributionStrategy,
    rejection_sampler: &mut RejectionSampler,
    options: &ForwardOptions<'_>,
) -> Result<(VerificationRecord, Option<T::Cache>)> {
    let cursor = buffer.cursor();
    let k = draft.len();

    let out = options.forward(target, buffer.window(cursor + k), cache)?;
    let logits = out.rows(cursor - 1, k + 1)?;
    let target_probs = strategy.transform(&logits)?;

    let accepted =
        rejection_sampler.accepted_prefix_len(&draft.tokens, &draft.probs, &target_probs)?;

    Ok((
        VerificationRecord {
            target_probs,
            accepted,
        },
        out.cache,
    ))
}
