//! Integration tests for target-only generation.

use candle_core::Device;
use nano_specdec::config::SamplingConfig;
use nano_specdec::engine::{autoregressive_generate, build_strategy, GreedySampler};
use nano_specdec::{BigramPredictor, Error, FinishReason, SpeculativeConfig};

/// Token `t` is followed by `t + 1`, wrapping to 0 (the stop token).
fn counter(vocab_size: usize) -> BigramPredictor {
    let rows = (0..vocab_size)
        .map(|t| {
            (0..vocab_size)
                .map(|u| if u == (t + 1) % vocab_size { 6.0 } else { 0.0 })
                .collect()
        })
        .collect();
    BigramPredictor::from_table(rows, &Device::Cpu).unwrap()
}

#[test]
fn test_generates_until_stop_token() {
    let mut target = counter(6);
    let config = SpeculativeConfig::new(vec![0]).max_new_tokens(20);

    let output =
        autoregressive_generate(&mut target, &[2], &config, &mut GreedySampler::new(), None)
            .unwrap();

    assert_eq!(output.tokens, vec![3, 4, 5, 0]);
    assert_eq!(output.finish_reason, FinishReason::EndOfSequence);
    assert_eq!(output.target_calls, 4);
}

#[test]
fn test_stops_at_budget() {
    let mut target = counter(10);
    let config = SpeculativeConfig::new(vec![0]).max_new_tokens(3);

    let output =
        autoregressive_generate(&mut target, &[1], &config, &mut GreedySampler::new(), None)
            .unwrap();

    assert_eq!(output.tokens, vec![2, 3, 4]);
    assert_eq!(output.finish_reason, FinishReason::MaxTokens);
}

#[test]
fn test_cache_does_not_change_output() {
    let target = BigramPredictor::random(12, 2.0, 9, &Device::Cpu).unwrap();
    let sampling = SamplingConfig {
        seed: Some(17),
        ..Default::default()
    };
    let config = SpeculativeConfig::new(vec![0]).max_new_tokens(30);

    let mut strategy = build_strategy(&sampling).unwrap();
    let cached =
        autoregressive_generate(&mut target.clone(), &[3], &config, strategy.as_mut(), None)
            .unwrap();

    let mut strategy = build_strategy(&sampling).unwrap();
    let uncached = autoregressive_generate(
        &mut target.clone(),
        &[3],
        &config.clone().use_cache(false),
        strategy.as_mut(),
        None,
    )
    .unwrap();

    assert_eq!(cached.tokens, uncached.tokens);
}

#[test]
fn test_missing_stop_tokens_rejected() {
    let mut target = counter(4);
    let err = autoregressive_generate(
        &mut target,
        &[1],
        &SpeculativeConfig::default(),
        &mut GreedySampler::new(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
