//! Integration tests for KVCache and cache pruning.

use candle_core::{DType, Device, Tensor};
use nano_specdec::core::kv_cache::{prune_cache, KVCache, LayerKVCache, PrunableCache};

fn states(seq: usize) -> Tensor {
    Tensor::ones((1, 4, seq, 8), DType::F32, &Device::Cpu).unwrap()
}

fn filled_cache(num_layers: usize, seq: usize) -> KVCache {
    let mut cache = KVCache::new(num_layers);
    for layer in 0..num_layers {
        cache.append(layer, &states(seq), &states(seq)).unwrap();
    }
    cache
}

#[test]
fn test_layer_cache_starts_empty() {
    let layer = LayerKVCache::new();
    assert_eq!(layer.seq_len(), 0);
    assert!(layer.key_cache().is_none());
    assert!(layer.value_cache().is_none());
}

#[test]
fn test_kv_cache_append_all_layers() {
    let cache = filled_cache(3, 5);

    assert_eq!(cache.num_layers(), 3);
    assert_eq!(cache.seq_len(), 5);
    for i in 0..3 {
        let layer = cache.layer(i).unwrap();
        assert_eq!(layer.key_cache().unwrap().dims(), &[1, 4, 5, 8]);
        assert_eq!(layer.value_cache().unwrap().dims(), &[1, 4, 5, 8]);
    }
}

#[test]
fn test_append_out_of_range_layer() {
    let mut cache = KVCache::new(2);
    assert!(cache.append(2, &states(1), &states(1)).is_err());
}

#[test]
fn test_prune_every_layer() {
    let cache = filled_cache(2, 7).prune(3).unwrap();

    assert_eq!(cache.seq_len(), 4);
    for i in 0..2 {
        assert_eq!(cache.layer(i).unwrap().seq_len(), 4);
    }
}

#[test]
fn test_prune_keeps_leading_positions() {
    let keys = Tensor::arange(0f32, 6.0, &Device::Cpu)
        .unwrap()
        .reshape((1, 1, 6, 1))
        .unwrap();
    let mut cache = KVCache::new(1);
    cache.append(0, &keys, &keys).unwrap();

    let cache = cache.prune(2).unwrap();
    let kept: Vec<f32> = cache
        .layer(0)
        .unwrap()
        .key_cache()
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert_eq!(kept, vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_prune_too_many_fails() {
    assert!(filled_cache(1, 2).prune(3).is_err());
}

#[test]
fn test_prune_cache_absent_or_zero_is_noop() {
    let none: Option<KVCache> = None;
    assert!(prune_cache(none, 4).unwrap().is_none());

    let kept = prune_cache(Some(filled_cache(1, 5)), 0).unwrap().unwrap();
    assert_eq!(kept.seq_len(), 5);

    let pruned = prune_cache(Some(filled_cache(1, 5)), 5).unwrap().unwrap();
    assert_eq!(pruned.seq_len(), 0);
}
