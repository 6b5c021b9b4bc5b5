//! Fixed-capacity token buffer for a single generation call.
//!
//! The buffer is allocated once with the prompt followed by padding. A cursor
//! splits it into three regions:
//!
//! ```text
//! [0, prompt_len)        prompt (immutable)
//! [prompt_len, cursor)   finalized output
//! [cursor, capacity)     pad placeholders / provisional drafts
//! ```
//!
//! Speculative tokens are written past the cursor and either become final when
//! the cursor advances over them or are blanked back to the pad value.

use crate::error::{Error, Result};

/// Reason a generation call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A stop token was finalized.
    EndOfSequence,
    /// The buffer filled up without a stop token.
    MaxTokens,
    /// The caller stopped the session between steps.
    Aborted,
}

impl FinishReason {
    /// Get the reason name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndOfSequence => "EndOfSequence",
            Self::MaxTokens => "MaxTokens",
            Self::Aborted => "Aborted",
        }
    }
}

/// Fixed-length token array with a forward-only cursor.
///
/// # Example
///
/// ```
/// use nano_specdec::core::sequence::SequenceBuffer;
///
/// let mut buf = SequenceBuffer::new(&[5, 6, 7], 6, 0).unwrap();
/// assert_eq!(buf.cursor(), 3);
/// assert_eq!(buf.remaining(), 3);
///
/// buf.write(3, 42);
/// buf.advance(1);
/// assert_eq!(buf.output(), &[42]);
/// ```
#[derive(Debug, Clone)]
pub struct SequenceBuffer {
    tokens: Vec<u32>,
    prompt_len: usize,
    cursor: usize,
    pad_token_id: u32,
}

impl SequenceBuffer {
    /// Allocate the buffer and copy the prompt into its head.
    ///
    /// Fails if the prompt is empty or does not fit in `capacity`.
    pub fn new(prompt: &[u32], capacity: usize, pad_token_id: u32) -> Result<Self> {
        if prompt.is_empty() {
            return Err(Error::Config("prompt must contain at least one token".into()));
        }
        if prompt.len() > capacity {
            return Err(Error::Config(format!(
                "prompt of {} tokens does not fit in a buffer of {}",
                prompt.len(),
                capacity
            )));
        }

        let mut tokens = vec![pad_token_id; capacity];
        tokens[..prompt.len()].copy_from_slice(prompt);

        Ok(Self {
            tokens,
            prompt_len: prompt.len(),
            cursor: prompt.len(),
            pad_token_id,
        })
    }

    // ========== Getters ==========

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.tokens.len()
    }

    /// Number of prompt tokens.
    pub fn prompt_len(&self) -> usize {
        self.prompt_len
    }

    /// First position that is not finalized.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Slots left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// Whether every slot has been finalized.
    pub fn is_full(&self) -> bool {
        self.cursor >= self.capacity()
    }

    /// Pad placeholder value.
    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Tokens `[0, end)`, the window a predictor sees.
    pub fn window(&self, end: usize) -> &[u32] {
        &self.tokens[..end]
    }

    /// Tokens `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> &[u32] {
        &self.tokens[start..end]
    }

    /// Finalized output: `[prompt_len, cursor)`.
    pub fn output(&self) -> &[u32] {
        &self.tokens[self.prompt_len..self.cursor]
    }

    /// Whole backing array, including pad placeholders.
    pub fn as_slice(&self) -> &[u32] {
        &self.tokens
    }

    // ========== Mutation ==========

    /// Write one token.
    ///
    /// # Panics
    ///
    /// Panics if `position` is inside the prompt or past the capacity.
    pub fn write(&mut self, position: usize, token: u32) {
        assert!(
            position >= self.prompt_len,
            "write at {position} would overwrite the prompt"
        );
        assert!(
            position < self.capacity(),
            "write at {position} past buffer capacity {}",
            self.capacity()
        );
        self.tokens[position] = token;
    }

    /// Pad-fill `[start, end)`, blanking rejected speculative tokens.
    ///
    /// # Panics
    ///
    /// Panics if the range touches finalized tokens or runs past the capacity.
    pub fn fill_pad(&mut self, start: usize, end: usize) {
        assert!(
            start >= self.cursor,
            "pad fill from {start} would erase finalized tokens (cursor {})",
            self.cursor
        );
        assert!(end <= self.capacity(), "pad fill to {end} past buffer capacity");
        if start < end {
            let pad = self.pad_token_id;
            self.tokens[start..end].fill(pad);
        }
    }

    /// Finalize the next `n` slots.
    ///
    /// # Panics
    ///
    /// Panics if the cursor would move past the capacity.
    pub fn advance(&mut self, n: usize) {
        assert!(
            self.cursor + n <= self.capacity(),
            "cursor {} + {n} past buffer capacity {}",
            self.cursor,
            self.capacity()
        );
        self.cursor += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_after_new() {
        let buf = SequenceBuffer::new(&[1, 2], 5, 0).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 0, 0, 0]);
        assert_eq!(buf.cursor(), 2);
        assert!(buf.output().is_empty());
    }

    #[test]
    fn test_fill_pad_empty_range_is_noop() {
        let mut buf = SequenceBuffer::new(&[1], 3, 9).unwrap();
        buf.write(1, 4);
        buf.fill_pad(2, 2);
        assert_eq!(buf.as_slice(), &[1, 4, 9]);
    }

    #[test]
    #[should_panic(expected = "past buffer capacity")]
    fn test_write_past_capacity_panics() {
        let mut buf = SequenceBuffer::new(&[1], 2, 0).unwrap();
        buf.write(2, 7);
    }

    #[test]
    #[should_panic(expected = "overwrite the prompt")]
    fn test_write_into_prompt_panics() {
        let mut buf = SequenceBuffer::new(&[1, 2], 4, 0).unwrap();
        buf.write(1, 7);
    }
}
