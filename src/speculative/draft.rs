//! Draft phase: the drafter proposes tokens one at a time.

use candle_core::Tensor;

use crate::core::sequence::SequenceBuffer;
use crate::engine::sampler::DistributionStrategy;
use crate::error::Result;
use crate::model::predictor::{ForwardOptions, Predictor};

/// Tokens proposed in one step, with the distribution each was drawn from.
#[derive(Debug, Clone, Default)]
pub struct DraftRecord {
    /// Proposed tokens `x_0..x_{k-1}`.
    pub tokens: Vec<u32>,
    /// Draft distributions `q_0..q_{k-1}`, each `[vocab_size]`.
    pub probs: Vec<Tensor>,
}

impl DraftRecord {
    /// Number of drafted positions.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether nothing was drafted.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Draft `k` tokens starting at the buffer cursor.
///
/// Step `i` runs the drafter on `[0, cursor + i)`, samples `x_i` from its last
/// row and writes it provisionally at `cursor + i`. There is no stop-token
/// check here; stops are only honoured over the verified prefix.
pub fn propose<D: Predictor>(
    drafter: &mut D,
    cache: Option<D::Cache>,
    buffer: &mut SequenceBuffer,
    k: usize,
    strategy: &mut dyn DistributionStrategy,
    options: &ForwardOptions<'_>,
) -> Result<(DraftRecord, Option<D::Cache>)> {
    let cursor = buffer.cursor();
    let mut record = DraftRecord {
        tokens: Vec::with_capacity(k),
        probs: Vec::with_capacity(k),
    };
    let mut cache = cache;

    for i in 0..k {
        let window_len = cursor + i;
        let out = options.forward(drafter, buffer.window(window_len), cache.take())?;

        let q = strategy.transform(&out.last_row()?)?;
        let token = strategy.sample(&q)?;
        buffer.write(window_len, token);
        cache = out.cache;

        record.tokens.push(token);
        record.probs.push(q);
    }

    Ok((record, cache))
}
