//! Rejection sampling for speculative decoding.
//!
//! For draft token `x_i` proposed with draft probability `q_i(x_i)` and target
//! probability `p_i(x_i)`, position `i` is accepted iff
//!
//! ```text
//! r_i <= p_i(x_i) / q_i(x_i),    r_i ~ U[0, 1)
//! ```
//!
//! The accepted prefix ends at the first rejection. Resampling at the
//! rejected position from `norm(max(0, p_n - q_n))` makes the emitted tokens
//! distributed exactly as if sampled from the target alone.

use candle_core::{DType, Tensor};
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// Probability of `token` in a `[vocab]` distribution row.
pub fn token_prob(row: &Tensor, token: u32) -> Result<f32> {
    let vocab_size = row.dim(0)?;
    if token as usize >= vocab_size {
        return Err(Error::Predictor(format!(
            "token {token} outside vocabulary of {vocab_size}"
        )));
    }
    Ok(row.get(token as usize)?.to_dtype(DType::F32)?.to_scalar::<f32>()?)
}

/// Acceptance threshold `p(x) / q(x)`; `+inf` when `q(x) == 0`.
pub fn acceptance_ratio(target_prob: f32, draft_prob: f32) -> f32 {
    if draft_prob == 0.0 {
        f32::INFINITY
    } else {
        target_prob / draft_prob
    }
}

/// Index of the first position whose draw exceeds its ratio, or `ratios.len()`.
pub fn first_rejection(ratios: &[f32], draws: &[f32]) -> usize {
    ratios
        .iter()
        .zip(draws)
        .position(|(&ratio, &r)| r > ratio)
        .unwrap_or(ratios.len())
}

/// `norm(max(0, p - q))` for two `[vocab]` rows.
///
/// Falls back to `p` when the clamped difference has no mass.
pub fn residual_distribution(target_probs: &Tensor, draft_probs: &Tensor) -> Result<Tensor> {
    if target_probs.dims() != draft_probs.dims() {
        return Err(Error::VocabMismatch {
            draft: draft_probs.dim(0)?,
            target: target_probs.dim(0)?,
        });
    }
    let residual = (target_probs - draft_probs)?.relu()?;
    let mass = residual.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    if mass > 0.0 {
        Ok((residual / mass as f64)?)
    } else {
        Ok(target_probs.clone())
    }
}

/// Rejection sampler with its own uniform source.
#[derive(Debug, Clone)]
pub struct RejectionSampler {
    rng: rand::rngs::StdRng,
}

impl Default for RejectionSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl RejectionSampler {
    /// Create a sampler seeded from entropy.
    pub fn new() -> Self {
        Self {
            rng: rand::rngs::StdRng::from_entropy(),
        }
    }

    /// Create a sampler with a fixed seed for reproducibility.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }

    /// Draw one uniform value per draft position.
    pub fn draw(&mut self, k: usize) -> Vec<f32> {
        (0..k).map(|_| self.rng.gen::<f32>()).collect()
    }

    /// Accepted prefix length for `draft_tokens`.
    ///
    /// `draft_probs[i]` is `q_i`; row `i` of `target_probs` is `p_i`. Extra
    /// target rows (the bonus position) are ignored.
    pub fn accepted_prefix_len(
        &mut self,
        draft_tokens: &[u32],
        draft_probs: &[Tensor],
        target_probs: &Tensor,
    ) -> Result<usize> {
        let ratios = acceptance_ratios(draft_tokens, draft_probs, target_probs)?;
        let draws = self.draw(ratios.len());
        Ok(first_rejection(&ratios, &draws))
    }
}

/// `p_i(x_i) / q_i(x_i)` for every draft position.
pub fn acceptance_ratios(
    draft_tokens: &[u32],
    draft_probs: &[Tensor],
    target_probs: &Tensor,
) -> Result<Vec<f32>> {
    let k = draft_tokens.len();
    if draft_probs.len() != k {
        return Err(Error::Predictor(format!(
            "{} draft distributions for {k} draft tokens",
            draft_probs.len()
        )));
    }
    let (target_rows, target_vocab) = target_probs.dims2()?;
    if target_rows < k {
        return Err(Error::Predictor(format!(
            "{target_rows} target distributions for {k} draft tokens"
        )));
    }

    let mut ratios = Vec::with_capacity(k);
    for (i, (&token, q)) in draft_tokens.iter().zip(draft_probs).enumerate() {
        let draft_vocab = q.dim(0)?;
        if draft_vocab != target_vocab {
            return Err(Error::VocabMismatch {
                draft: draft_vocab,
                target: target_vocab,
            });
        }
        let p = target_probs.get(i)?;
        ratios.push(acceptance_ratio(token_prob(&p, token)?, token_prob(q, token)?));
    }
    Ok(ratios)
}

/// Distribution the correction/bonus token is drawn from.
///
/// Full acceptance (`accepted == draft_probs.len()`) uses the bonus row
/// `p_k`. Otherwise the residual at the rejected position, or the raw `p_n`
/// when `skip_adjustment` is set.
pub fn correction_distribution(
    target_probs: &Tensor,
    draft_probs: &[Tensor],
    accepted: usize,
    skip_adjustment: bool,
) -> Result<Tensor> {
    let p_n = target_probs.get(accepted)?;
    if accepted == draft_probs.len() || skip_adjustment {
        return Ok(p_n);
    }
    residual_distribution(&p_n, &draft_probs[accepted])
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_ratio_with_zero_draft_prob_accepts() {
        assert!(acceptance_ratio(0.3, 0.0).is_infinite());
        assert!(acceptance_ratio(0.0, 0.0).is_infinite());
        assert_eq!(first_rejection(&[f32::INFINITY], &[0.999]), 1);
    }

    #[test]
    fn test_first_rejection() {
        assert_eq!(first_rejection(&[1.0, 0.5, 1.0], &[0.9, 0.6, 0.1]), 1);
        assert_eq!(first_rejection(&[1.0, 0.5], &[0.2, 0.5]), 2);
        assert_eq!(first_rejection(&[], &[]), 0);
    }

    #[test]
    fn test_residual_fallback_on_identical_rows() {
        let p = Tensor::new(&[0.25f32, 0.75], &Device::Cpu).unwrap();
        let r = residual_distribution(&p, &p).unwrap();
        assert_eq!(r.to_vec1::<f32>().unwrap(), vec![0.25, 0.75]);
    }

    #[test]
    fn test_correction_uses_bonus_on_full_acceptance() {
        let device = Device::Cpu;
        let p = Tensor::new(&[[0.5f32, 0.5], [0.1, 0.9]], &device).unwrap();
        let q = vec![Tensor::new(&[0.9f32, 0.1], &device).unwrap()];

        let bonus = correction_distribution(&p, &q, 1, false).unwrap();
        assert_eq!(bonus.to_vec1::<f32>().unwrap(), vec![0.1, 0.9]);

        let residual = correction_distribution(&p, &q, 0, false).unwrap();
        let v = residual.to_vec1::<f32>().unwrap();
        assert_eq!(v[0], 0.0);
        assert!((v[1] - 1.0).abs() < 1e-6);

        let raw = correction_distribution(&p, &q, 0, true).unwrap();
        assert_eq!(raw.to_vec1::<f32>().unwrap(), vec![0.5, 0.5]);
    }
}
