//! Token sampling strategies.
//!
//! A [`DistributionStrategy`] turns raw logits into a probability distribution
//! over the full vocabulary and draws tokens from such distributions. The
//! decoding loop only relies on that contract, never on which strategy is in
//! use:
//!
//! - **Greedy**: one-hot at the arg-max, arg-max for the draw
//! - **Stochastic**: temperature, optional top-k and top-p filters, weighted draw
//!
//! ## Sampling Pipeline
//!
//! ```text
//! Logits [rows, vocab_size]
//!     │
//!     ▼ Temperature scaling
//! Logits / temperature
//!     │
//!     ▼ Top-k filtering (optional)
//! Everything outside the top k set to -inf
//!     │
//!     ▼ Softmax
//! Probabilities
//!     │
//!     ▼ Top-p filtering (optional)
//! Tail beyond cumulative p zeroed, renormalized
//!     │
//!     ▼ Sample
//! Selected token
//! ```
//!
//! Filtered tokens keep an explicit probability of 0 so that `p(x)` and
//! `q(x)` are defined for every token during rejection sampling.

use candle_core::{DType, Tensor, D};
use rand::distributions::Distribution;
use rand::SeedableRng;

use crate::config::SamplingConfig;
use crate::error::{Error, Result};

/// Maps logits to probabilities and draws tokens.
pub trait DistributionStrategy {
    /// Convert logits `[vocab]` or `[rows, vocab]` into row-stochastic probabilities.
    fn transform(&self, logits: &Tensor) -> Result<Tensor>;

    /// Draw one token from a `[vocab]` (or `[1, vocab]`) distribution.
    fn sample(&mut self, probs: &Tensor) -> Result<u32>;

    /// Whether `sample` ignores randomness.
    fn is_deterministic(&self) -> bool;
}

/// Build the strategy a sampling config describes.
pub fn build_strategy(config: &SamplingConfig) -> Result<Box<dyn DistributionStrategy>> {
    config.validate()?;
    if config.is_greedy() {
        return Ok(Box::new(GreedySampler::new()));
    }
    let sampler = match config.seed {
        Some(seed) => Sampler::with_seed(config, seed),
        None => Sampler::new(config),
    };
    Ok(Box::new(sampler))
}

/// Arg-max decoding.
///
/// The distribution is one-hot at the arg-max, so two greedy predictors agree
/// on a token exactly when `p(x) / q(x) == 1` and the residual after a
/// rejection is the target's own choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySampler;

impl GreedySampler {
    /// Create a greedy sampler.
    pub fn new() -> Self {
        Self
    }
}

impl DistributionStrategy for GreedySampler {
    fn transform(&self, logits: &Tensor) -> Result<Tensor> {
        let logits = logits.to_dtype(DType::F32)?;
        map_rows(&logits, one_hot_argmax)
    }

    fn sample(&mut self, probs: &Tensor) -> Result<u32> {
        let row = single_row(probs)?;
        Ok(argmax(&row))
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Stochastic sampler with temperature, top-k and top-p.
///
/// A temperature of 0 selects arg-max decoding, same as [`GreedySampler`].
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Temperature for scaling logits (0 = greedy).
    temperature: f32,
    /// Top-k value (0 = disabled).
    top_k: usize,
    /// Top-p value (1.0 = disabled).
    top_p: f32,
    /// Random number generator.
    rng: rand::rngs::StdRng,
}

impl Sampler {
    /// Creates a new sampler with the given configuration.
    pub fn new(config: &SamplingConfig) -> Self {
        Self::with_rng(config, rand::rngs::StdRng::from_entropy())
    }

    /// Creates a new sampler with a specific seed for reproducibility.
    pub fn with_seed(config: &SamplingConfig, seed: u64) -> Self {
        Self::with_rng(config, rand::rngs::StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SamplingConfig, rng: rand::rngs::StdRng) -> Self {
        Self {
            temperature: config.temperature.max(0.0),
            top_k: config.top_k,
            top_p: config.top_p,
            rng,
        }
    }
}

impl DistributionStrategy for Sampler {
    fn transform(&self, logits: &Tensor) -> Result<Tensor> {
        if self.is_deterministic() {
            return GreedySampler.transform(logits);
        }
        let logits = scale(logits, self.temperature)?;
        let vocab_size = logits.dim(D::Minus1)?;

        let logits = if self.top_k > 0 && self.top_k < vocab_size {
            let k = self.top_k;
            map_rows(&logits, |row| mask_top_k(row, k))?
        } else {
            logits
        };

        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;

        if self.top_p < 1.0 {
            let p = self.top_p;
            map_rows(&probs, |row| keep_nucleus(row, p))
        } else {
            Ok(probs)
        }
    }

    fn sample(&mut self, probs: &Tensor) -> Result<u32> {
        let row = single_row(probs)?;
        if self.is_deterministic() {
            return Ok(argmax(&row));
        }
        let dist = rand::distributions::WeightedIndex::new(&row)
            .map_err(|e| Error::Config(format!("cannot sample from distribution: {e}")))?;
        Ok(dist.sample(&mut self.rng) as u32)
    }

    fn is_deterministic(&self) -> bool {
        self.temperature == 0.0
    }
}

/// Divide logits by the temperature, in f32.
fn scale(logits: &Tensor, temperature: f32) -> Result<Tensor> {
    let logits = logits.to_dtype(DType::F32)?;
    if temperature == 1.0 {
        Ok(logits)
    } else {
        Ok((logits / temperature as f64)?)
    }
}

/// Extract a single distribution row as a vec.
fn single_row(probs: &Tensor) -> Result<Vec<f32>> {
    let probs = probs.to_dtype(DType::F32)?;
    match probs.dims() {
        [_] => Ok(probs.to_vec1()?),
        [1, _] => Ok(probs.squeeze(0)?.to_vec1()?),
        dims => Err(Error::Predictor(format!(
            "expected a single distribution row, got shape {dims:?}"
        ))),
    }
}

/// Index of the largest entry; the first one on ties.
fn argmax(row: &[f32]) -> u32 {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best as u32
}

/// Replace a row with the one-hot vector of its arg-max.
fn one_hot_argmax(row: &mut [f32]) {
    let best = argmax(row) as usize;
    for (i, v) in row.iter_mut().enumerate() {
        *v = if i == best { 1.0 } else { 0.0 };
    }
}

/// Apply `f` to every row of a 1D or 2D f32 tensor.
fn map_rows(t: &Tensor, f: impl Fn(&mut [f32])) -> Result<Tensor> {
    match t.dims() {
        &[n] => {
            let mut v: Vec<f32> = t.to_vec1()?;
            f(&mut v);
            Ok(Tensor::from_vec(v, n, t.device())?)
        }
        &[rows, cols] => {
            let mut v: Vec<f32> = t.flatten_all()?.to_vec1()?;
            for row in v.chunks_mut(cols) {
                f(row);
            }
            Ok(Tensor::from_vec(v, (rows, cols), t.device())?)
        }
        dims => Err(Error::Predictor(format!(
            "expected 1D or 2D logits, got shape {dims:?}"
        ))),
    }
}

/// Indices sorted by value, largest first.
fn sorted_desc(row: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_by(|&a, &b| {
        row[b]
            .partial_cmp(&row[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Keep the k largest logits, set the rest to -inf.
fn mask_top_k(row: &mut [f32], k: usize) {
    for &i in sorted_desc(row).iter().skip(k) {
        row[i] = f32::NEG_INFINITY;
    }
}

/// Keep tokens until cumulative probability exceeds `p`, zero the rest, renormalize.
fn keep_nucleus(row: &mut [f32], p: f32) {
    let order = sorted_desc(row);
    let mut cumulative = 0.0f32;
    let mut cutoff = order.len();
    for (rank, &i) in order.iter().enumerate() {
        cumulative += row[i];
        if cumulative > p {
            // Include the token that pushed us over
            cutoff = rank + 1;
            break;
        }
    }
    for &i in &order[cutoff..] {
        row[i] = 0.0;
    }
    let sum: f32 = row.iter().sum();
    if sum > 0.0 {
        row.iter_mut().for_each(|v| *v /= sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), 1);
    }

    #[test]
    fn test_greedy_transform_is_one_hot() {
        let logits = Tensor::new(&[[0.5f32, 2.0, 1.0], [3.0, 3.0, -1.0]], &candle_core::Device::Cpu)
            .unwrap();
        let probs = GreedySampler::new().transform(&logits).unwrap();
        assert_eq!(
            probs.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0]]
        );
    }

    #[test]
    fn test_mask_top_k() {
        let mut row = vec![0.1, 3.0, 0.2, 2.0];
        mask_top_k(&mut row, 2);
        assert_eq!(row[1], 3.0);
        assert_eq!(row[3], 2.0);
        assert!(row[0].is_infinite() && row[2].is_infinite());
    }

    #[test]
    fn test_keep_nucleus_renormalizes() {
        let mut row = vec![0.5, 0.3, 0.15, 0.05];
        keep_nucleus(&mut row, 0.7);
        // 0.5 + 0.3 crosses 0.7, so both stay.
        assert!((row[0] - 0.625).abs() < 1e-6);
        assert!((row[1] - 0.375).abs() < 1e-6);
        assert_eq!(row[2], 0.0);
        assert_eq!(row[3], 0.0);
    }
}
