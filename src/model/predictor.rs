//! Predictor call contract.
//!
//! A predictor maps a token window plus optional incremental state to
//! next-token logits. The decoding loop treats it as a black box:
//!
//! ```text
//! forward(window[0..len], state(len = s)) -> logits for positions [s, len), state(len = len)
//! ```
//!
//! Row `r` of the returned logits predicts the token at absolute position
//! `offset + r + 1`. Without a cache (`use_cache == false`) the whole window
//! is reprocessed, `offset` is 0 and no state is returned.

use candle_core::{Device, Tensor};

use crate::core::kv_cache::PrunableCache;
use crate::error::{Error, Result};

/// Context length assumed when a predictor does not declare one.
pub const DEFAULT_MAX_CONTEXT_LEN: usize = 1024;

/// Buffer length for a generation call: the requested length clamped to the
/// predictor's context window.
pub fn generation_capacity(
    max_context_len: Option<usize>,
    prompt_len: usize,
    max_new_tokens: usize,
) -> usize {
    max_context_len
        .unwrap_or(DEFAULT_MAX_CONTEXT_LEN)
        .min(prompt_len + max_new_tokens)
}

/// Named tensors passed through to a predictor unchanged.
///
/// Used for multimodal extras (pixel values, aspect-ratio tensors, a
/// cross-attention mask sized to the current window).
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryInputs {
    entries: Vec<(String, Tensor)>,
}

impl AuxiliaryInputs {
    /// Create an empty set of inputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named tensor.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = tensor,
            None => self.entries.push((name, tensor)),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Number of named tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tensors are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, tensor)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }
}

/// Builds the auxiliary inputs for one predictor call.
///
/// Called before every drafter and target invocation with the prompt length
/// and the length of the window about to be processed.
pub trait AuxiliaryContext {
    /// Inputs for a call over `window_len` tokens.
    fn inputs_for(&self, prompt_len: usize, window_len: usize) -> Result<AuxiliaryInputs>;
}

/// Result of one predictor call.
#[derive(Debug)]
pub struct PredictorOutput<C> {
    /// Logits, shape `[num_positions, vocab_size]`.
    pub logits: Tensor,
    /// Absolute window position of logits row 0.
    pub offset: usize,
    /// Updated state; `None` when caching is disabled.
    pub cache: Option<C>,
}

impl<C> PredictorOutput<C> {
    /// Number of positions covered by the logits.
    pub fn num_positions(&self) -> Result<usize> {
        Ok(self.logits.dim(0)?)
    }

    /// Logits rows for absolute positions `[start, start + len)`.
    pub fn rows(&self, start: usize, len: usize) -> Result<Tensor> {
        let available = self.num_positions()?;
        if start < self.offset || start + len > self.offset + available {
            return Err(Error::Predictor(format!(
                "need logits for positions [{start}, {}), predictor returned [{}, {})",
                start + len,
                self.offset,
                self.offset + available
            )));
        }
        Ok(self.logits.narrow(0, start - self.offset, len)?)
    }

    /// Logits row for the last processed position.
    pub fn last_row(&self) -> Result<Tensor> {
        let available = self.num_positions()?;
        if available == 0 {
            return Err(Error::Predictor("predictor returned no logits".into()));
        }
        Ok(self.logits.get(available - 1)?)
    }
}

/// A next-token predictor (drafter or target).
pub trait Predictor {
    /// Incremental state threaded between calls.
    type Cache: PrunableCache;

    /// Vocabulary size of the logits.
    fn vocab_size(&self) -> usize;

    /// Maximum window length, if the predictor has one.
    fn max_context_len(&self) -> Option<usize> {
        None
    }

    /// Device the logits live on.
    fn device(&self) -> &Device;

    /// Run the predictor over `input_ids`.
    ///
    /// When `cache` holds `s` positions only `input_ids[s..]` is processed.
    /// `use_cache == false` must reprocess the full window and return no state.
    fn forward(
        &mut self,
        input_ids: &[u32],
        cache: Option<Self::Cache>,
        use_cache: bool,
        aux: Option<&AuxiliaryInputs>,
    ) -> Result<PredictorOutput<Self::Cache>>;
}

/// Settings shared by every predictor call of one generation call.
#[derive(Clone, Copy)]
pub struct ForwardOptions<'a> {
    /// Thread incremental state between calls.
    pub use_cache: bool,
    /// Prompt length, for sizing auxiliary inputs.
    pub prompt_len: usize,
    /// Builder for per-call auxiliary inputs.
    pub aux: Option<&'a dyn AuxiliaryContext>,
}

impl<'a> ForwardOptions<'a> {
    /// Run `predictor` over `window`, attaching auxiliary inputs sized to it.
    pub fn forward<P: Predictor>(
        &self,
        predictor: &mut P,
        window: &[u32],
        cache: Option<P::Cache>,
    ) -> Result<PredictorOutput<P::Cache>> {
        let inputs = self
            .aux
            .map(|ctx| ctx.inputs_for(self.prompt_len, window.len()))
            .transpose()?;
        predictor.forward(window, cache, self.use_cache, inputs.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_rows_by_absolute_position() {
        let logits = Tensor::arange(0f32, 12.0, &Device::Cpu)
            .unwrap()
            .reshape((4, 3))
            .unwrap();
        let out: PredictorOutput<crate::core::KVCache> = PredictorOutput {
            logits,
            offset: 5,
            cache: None,
        };

        let rows = out.rows(6, 2).unwrap();
        assert_eq!(
            rows.to_vec2::<f32>().unwrap(),
            vec![vec![3.0, 4.0, 5.0], vec![6.0, 7.0, 8.0]]
        );
        assert!(out.rows(4, 1).is_err());
        assert!(out.rows(8, 2).is_err());
    }

    #[test]
    fn test_auxiliary_insert_replaces() {
        let t = Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap();
        let mut aux = AuxiliaryInputs::new().with("mask", t.clone());
        aux.insert("mask", Tensor::ones(3, DType::F32, &Device::Cpu).unwrap());

        assert_eq!(aux.len(), 1);
        assert_eq!(aux.get("mask").unwrap().dims(), &[3]);
    }
}
