//! Table-driven bigram predictor.
//!
//! Logits for the next token depend only on the current token:
//! `logits(position i) = table[window[i]]`. Small enough to run anywhere, yet
//! it honours the full predictor contract, including an incremental
//! [`KVCache`] that stores each processed token id as its key/value state.
//! Incoming caches are checked against the window, so a cache that was pruned
//! to the wrong length or kept rejected tokens is reported as an error.

use candle_core::{DType, Device, Tensor};
use rand::{Rng, SeedableRng};

use crate::core::kv_cache::{KVCache, PrunableCache};
use crate::error::{Error, Result};
use crate::model::predictor::{AuxiliaryInputs, Predictor, PredictorOutput};

/// Bigram language model over a `[vocab, vocab]` logits table.
#[derive(Debug, Clone)]
pub struct BigramPredictor {
    /// Row `t` holds the logits of the token following `t`.
    table: Tensor,
    vocab_size: usize,
    max_context_len: Option<usize>,
    device: Device,
}

impl BigramPredictor {
    /// Build from a square logits table.
    pub fn from_table(rows: Vec<Vec<f32>>, device: &Device) -> Result<Self> {
        let vocab_size = rows.len();
        if vocab_size == 0 || rows.iter().any(|r| r.len() != vocab_size) {
            return Err(Error::Config(format!(
                "bigram table must be square and non-empty, got {} rows",
                vocab_size
            )));
        }
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let table = Tensor::from_vec(flat, (vocab_size, vocab_size), device)?;
        Ok(Self {
            table,
            vocab_size,
            max_context_len: None,
            device: device.clone(),
        })
    }

    /// Build from an existing `[vocab, vocab]` tensor.
    pub fn from_tensor(table: Tensor) -> Result<Self> {
        let (rows, cols) = table.dims2()?;
        if rows != cols || rows == 0 {
            return Err(Error::Config(format!(
                "bigram table must be square and non-empty, got {rows}x{cols}"
            )));
        }
        let device = table.device().clone();
        Ok(Self {
            table: table.to_dtype(DType::F32)?,
            vocab_size: rows,
            max_context_len: None,
            device,
        })
    }

    /// Random logits in `[-scale, scale)`, reproducible from `seed`.
    pub fn random(vocab_size: usize, scale: f32, seed: u64, device: &Device) -> Result<Self> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let rows = (0..vocab_size)
            .map(|_| {
                (0..vocab_size)
                    .map(|_| rng.gen_range(-scale..scale))
                    .collect()
            })
            .collect();
        Self::from_table(rows, device)
    }

    /// Copy of this predictor with uniform noise in `[-noise, noise)` added to every logit.
    ///
    /// Used to derive a drafter that mostly agrees with a target.
    pub fn perturbed(&self, noise: f32, seed: u64) -> Result<Self> {
        if noise <= 0.0 {
            return Ok(self.clone());
        }
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let n = self.vocab_size * self.vocab_size;
        let offsets: Vec<f32> = (0..n).map(|_| rng.gen_range(-noise..noise)).collect();
        let offsets = Tensor::from_vec(offsets, (self.vocab_size, self.vocab_size), &self.device)?;
        Ok(Self {
            table: (&self.table + offsets)?,
            ..self.clone()
        })
    }

    /// Declare a maximum window length.
    pub fn with_max_context_len(mut self, max_context_len: usize) -> Self {
        self.max_context_len = Some(max_context_len);
        self
    }

    /// The logits table.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    /// Check that the cached states match the window prefix.
    fn check_cached(&self, cache: &KVCache, prefix: &[u32]) -> Result<()> {
        let Some(keys) = cache.layer(0).and_then(|l| l.key_cache()) else {
            return Ok(());
        };
        let cached: Vec<f32> = keys.flatten_all()?.to_vec1()?;
        for (position, (&state, &token)) in cached.iter().zip(prefix).enumerate() {
            if state != token as f32 {
                return Err(Error::Cache(format!(
                    "cached position {position} holds token {state}, window has {token}"
                )));
            }
        }
        Ok(())
    }
}

impl Predictor for BigramPredictor {
    type Cache = KVCache;

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn max_context_len(&self) -> Option<usize> {
        self.max_context_len
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(
        &mut self,
        input_ids: &[u32],
        cache: Option<KVCache>,
        use_cache: bool,
        _aux: Option<&AuxiliaryInputs>,
    ) -> Result<PredictorOutput<KVCache>> {
        let cache = if use_cache { cache } else { None };
        let start = cache.as_ref().map_or(0, PrunableCache::seq_len);
        if start >= input_ids.len() {
            return Err(Error::Cache(format!(
                "cache holds {start} positions but the window has only {}",
                input_ids.len()
            )));
        }
        if let Some(cache) = &cache {
            self.check_cached(cache, &input_ids[..start])?;
        }

        let new_ids = &input_ids[start..];
        if let Some(&bad) = new_ids.iter().find(|&&t| t as usize >= self.vocab_size) {
            return Err(Error::Predictor(format!(
                "token {bad} outside vocabulary of {}",
                self.vocab_size
            )));
        }

        let ids = Tensor::new(new_ids, &self.device)?;
        let logits = self.table.index_select(&ids, 0)?;

        let cache = if use_cache {
            let states = ids.to_dtype(DType::F32)?.reshape((1, 1, new_ids.len(), 1))?;
            let mut cache = cache.unwrap_or_else(|| KVCache::new(1));
            cache.append(0, &states, &states)?;
            Some(cache)
        } else {
            None
        };

        Ok(PredictorOutput {
            logits,
            offset: start,
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_shift(vocab: usize) -> BigramPredictor {
        // Token t is always followed by t + 1 (mod vocab).
        let rows = (0..vocab)
            .map(|t| {
                (0..vocab)
                    .map(|u| if u == (t + 1) % vocab { 5.0 } else { 0.0 })
                    .collect()
            })
            .collect();
        BigramPredictor::from_table(rows, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_forward_without_cache_covers_window() {
        let mut model = identity_shift(4);
        let out = model.forward(&[0, 1, 2], None, false, None).unwrap();

        assert_eq!(out.offset, 0);
        assert_eq!(out.logits.dims(), &[3, 4]);
        assert!(out.cache.is_none());
    }

    #[test]
    fn test_forward_with_cache_processes_suffix() {
        let mut model = identity_shift(4);
        let first = model.forward(&[0, 1], None, true, None).unwrap();
        assert_eq!(first.cache.as_ref().unwrap().seq_len(), 2);

        let second = model.forward(&[0, 1, 2, 3], first.cache, true, None).unwrap();
        assert_eq!(second.offset, 2);
        assert_eq!(second.logits.dims(), &[2, 4]);
        assert_eq!(second.cache.unwrap().seq_len(), 4);
    }

    #[test]
    fn test_stale_cache_detected() {
        let mut model = identity_shift(4);
        let out = model.forward(&[0, 1, 2], None, true, None).unwrap();

        let err = model.forward(&[0, 3, 2, 1], out.cache, true, None);
        assert!(matches!(err, Err(Error::Cache(_))));
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = BigramPredictor::random(6, 2.0, 7, &Device::Cpu).unwrap();
        let b = BigramPredictor::random(6, 2.0, 7, &Device::Cpu).unwrap();
        assert_eq!(
            a.table().to_vec2::<f32>().unwrap(),
            b.table().to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_non_square_table_rejected() {
        let rows = vec![vec![0.0, 1.0], vec![0.0]];
        assert!(BigramPredictor::from_table(rows, &Device::Cpu).is_err());
    }
}
