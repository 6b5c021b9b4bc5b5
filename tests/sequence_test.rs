//! Integration tests for SequenceBuffer.

use nano_specdec::core::sequence::{FinishReason, SequenceBuffer};

#[test]
fn test_buffer_creation() {
    let buf = SequenceBuffer::new(&[10, 20, 30, 40], 8, 0).unwrap();

    assert_eq!(buf.capacity(), 8);
    assert_eq!(buf.prompt_len(), 4);
    assert_eq!(buf.cursor(), 4);
    assert_eq!(buf.remaining(), 4);
    assert!(!buf.is_full());
    assert!(buf.output().is_empty());
    assert_eq!(buf.as_slice(), &[10, 20, 30, 40, 0, 0, 0, 0]);
}

#[test]
fn test_empty_prompt_rejected() {
    assert!(SequenceBuffer::new(&[], 4, 0).is_err());
}

#[test]
fn test_prompt_longer_than_capacity_rejected() {
    assert!(SequenceBuffer::new(&[1, 2, 3], 2, 0).is_err());
    assert!(SequenceBuffer::new(&[1, 2, 3], 3, 0).unwrap().is_full());
}

#[test]
fn test_provisional_writes_do_not_move_cursor() {
    let mut buf = SequenceBuffer::new(&[1, 2], 6, 99).unwrap();

    buf.write(2, 7);
    buf.write(3, 8);
    assert_eq!(buf.cursor(), 2);
    assert_eq!(buf.window(4), &[1, 2, 7, 8]);
    assert!(buf.output().is_empty());

    buf.advance(1);
    assert_eq!(buf.output(), &[7]);
}

#[test]
fn test_rejected_tail_padded_then_correction_written() {
    let mut buf = SequenceBuffer::new(&[1, 2], 7, 99).unwrap();
    for (i, t) in [7, 8, 9].into_iter().enumerate() {
        buf.write(2 + i, t);
    }

    // One draft accepted, two rejected, correction token 5 at position 3.
    buf.fill_pad(3, 5);
    buf.write(3, 5);
    buf.advance(2);

    assert_eq!(buf.as_slice(), &[1, 2, 7, 5, 99, 99, 99]);
    assert_eq!(buf.output(), &[7, 5]);
    assert_eq!(buf.remaining(), 3);
}

#[test]
fn test_advance_to_capacity() {
    let mut buf = SequenceBuffer::new(&[1], 3, 0).unwrap();
    buf.write(1, 4);
    buf.write(2, 5);
    buf.advance(2);

    assert!(buf.is_full());
    assert_eq!(buf.remaining(), 0);
    assert_eq!(buf.output(), &[4, 5]);
}

#[test]
#[should_panic(expected = "overwrite the prompt")]
fn test_write_into_prompt_panics() {
    let mut buf = SequenceBuffer::new(&[1, 2], 4, 0).unwrap();
    buf.write(1, 3);
}

#[test]
#[should_panic(expected = "past buffer capacity")]
fn test_write_past_capacity_panics() {
    let mut buf = SequenceBuffer::new(&[1, 2], 4, 0).unwrap();
    buf.write(4, 3);
}

#[test]
#[should_panic(expected = "past buffer capacity")]
fn test_advance_past_capacity_panics() {
    let mut buf = SequenceBuffer::new(&[1, 2], 4, 0).unwrap();
    buf.advance(3);
}

#[test]
#[should_panic(expected = "erase finalized tokens")]
fn test_pad_fill_before_cursor_panics() {
    let mut buf = SequenceBuffer::new(&[1, 2], 4, 0).unwrap();
    buf.fill_pad(1, 3);
}

#[test]
fn test_finish_reason_as_str() {
    assert_eq!(FinishReason::EndOfSequence.as_str(), "EndOfSequence");
    assert_eq!(FinishReason::MaxTokens.as_str(), "MaxTokens");
    assert_eq!(FinishReason::Aborted.as_str(), "Aborted");
}
