//! Cross-attention context for vision-language predictors.
//!
//! The image tensors are fixed for the whole generation call. The
//! cross-attention mask covers the prompt rows only, so every call extends it
//! with all-ones rows for each generated position in the window:
//!
//! ```text
//! prompt mask     [batch, prompt_len, num_images, num_tiles]
//! call over L     [batch, L,          num_images, num_tiles]   (L - prompt_len rows of ones appended)
//! ```

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::model::predictor::{AuxiliaryContext, AuxiliaryInputs};

/// Input names handed to the predictor.
pub const PIXEL_VALUES: &str = "pixel_values";
pub const ASPECT_RATIO_IDS: &str = "aspect_ratio_ids";
pub const ASPECT_RATIO_MASK: &str = "aspect_ratio_mask";
pub const CROSS_ATTENTION_MASK: &str = "cross_attention_mask";

/// Sequence axis of the cross-attention mask.
const MASK_SEQ_DIM: usize = 1;

/// Image inputs plus a prompt-length cross-attention mask.
#[derive(Debug, Clone)]
pub struct CrossAttentionContext {
    pixel_values: Tensor,
    aspect_ratio_ids: Tensor,
    aspect_ratio_mask: Tensor,
    cross_attention_mask: Tensor,
}

impl CrossAttentionContext {
    /// Create a context.
    ///
    /// `cross_attention_mask` must be rank 4 with the prompt on axis 1.
    pub fn new(
        pixel_values: Tensor,
        aspect_ratio_ids: Tensor,
        aspect_ratio_mask: Tensor,
        cross_attention_mask: Tensor,
    ) -> Result<Self> {
        if cross_attention_mask.rank() != 4 {
            return Err(Error::Config(format!(
                "cross-attention mask must be rank 4, got shape {:?}",
                cross_attention_mask.dims()
            )));
        }
        Ok(Self {
            pixel_values,
            aspect_ratio_ids,
            aspect_ratio_mask,
            cross_attention_mask,
        })
    }

    /// Mask rows for a window of `window_len` tokens.
    pub fn mask_for(&self, prompt_len: usize, window_len: usize) -> Result<Tensor> {
        let mask_rows = self.cross_attention_mask.dim(MASK_SEQ_DIM)?;
        if mask_rows != prompt_len {
            return Err(Error::Config(format!(
                "cross-attention mask covers {mask_rows} rows, prompt has {prompt_len} tokens"
            )));
        }
        if window_len <= prompt_len {
            return Ok(self.cross_attention_mask.clone());
        }

        let (batch, _, num_images, num_tiles) = self.cross_attention_mask.dims4()?;
        let extra = Tensor::ones(
            (batch, window_len - prompt_len, num_images, num_tiles),
            self.cross_attention_mask.dtype(),
            self.cross_attention_mask.device(),
        )?;
        Ok(Tensor::cat(
            &[&self.cross_attention_mask, &extra],
            MASK_SEQ_DIM,
        )?)
    }
}

impl AuxiliaryContext for CrossAttentionContext {
    fn inputs_for(&self, prompt_len: usize, window_len: usize) -> Result<AuxiliaryInputs> {
        Ok(AuxiliaryInputs::new()
            .with(PIXEL_VALUES, self.pixel_values.clone())
            .with(ASPECT_RATIO_IDS, self.aspect_ratio_ids.clone())
            .with(ASPECT_RATIO_MASK, self.aspect_ratio_mask.clone())
            .with(CROSS_ATTENTION_MASK, self.mask_for(prompt_len, window_len)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn context(prompt_len: usize) -> CrossAttentionContext {
        let device = Device::Cpu;
        CrossAttentionContext::new(
            Tensor::zeros((4, 3, 8, 8), DType::F32, &device).unwrap(),
            Tensor::zeros((1, 1), DType::U32, &device).unwrap(),
            Tensor::ones((1, 1, 4), DType::U32, &device).unwrap(),
            Tensor::zeros((1, prompt_len, 1, 4), DType::F32, &device).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_mask_grows_with_window() {
        let ctx = context(3);

        assert_eq!(ctx.mask_for(3, 3).unwrap().dims(), &[1, 3, 1, 4]);

        let grown = ctx.mask_for(3, 5).unwrap();
        assert_eq!(grown.dims(), &[1, 5, 1, 4]);

        // Prompt rows untouched, generated rows all ones.
        let rows: Vec<f32> = grown
            .squeeze(0)
            .and_then(|t| t.squeeze(1))
            .and_then(|t| t.sum(1))
            .and_then(|t| t.to_vec1())
            .unwrap();
        assert_eq!(rows, vec![0.0, 0.0, 0.0, 4.0, 4.0]);
    }

    #[test]
    fn test_inputs_carry_fixed_tensors() {
        let ctx = context(2);
        let inputs = ctx.inputs_for(2, 4).unwrap();

        assert_eq!(inputs.len(), 4);
        assert_eq!(inputs.get(PIXEL_VALUES).unwrap().dims(), &[4, 3, 8, 8]);
        assert_eq!(
            inputs.get(CROSS_ATTENTION_MASK).unwrap().dims(),
            &[1, 4, 1, 4]
        );
    }

    #[test]
    fn test_prompt_length_mismatch_rejected() {
        let ctx = context(3);
        assert!(ctx.mask_for(2, 4).is_err());
    }

    #[test]
    fn test_rank_checked() {
        let device = Device::Cpu;
        let flat = Tensor::zeros(4, DType::F32, &device).unwrap();
        assert!(CrossAttentionContext::new(flat.clone(), flat.clone(), flat.clone(), flat).is_err());
    }
}
