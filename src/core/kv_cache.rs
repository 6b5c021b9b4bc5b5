//! Incremental predictor state and cache pruning.
//!
//! A predictor that supports caching hands back a state value after every
//! call; the caller threads it into the next call and never looks inside. The
//! only structural operation the decoding loop needs is truncation: dropping
//! trailing positions that belonged to rejected speculative tokens.
//!
//! ## Memory Layout
//!
//! [`KVCache`] stores per-layer key and value tensors with shape
//! `[batch, num_kv_heads, seq_len, head_dim]`, growing along the sequence axis.
//! Pruning narrows that axis.

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Sequence axis of the key/value tensors.
pub const SEQ_DIM: usize = 2;

/// Incremental state that can be truncated to a shorter sequence.
///
/// `seq_len` must equal the number of window positions the owning predictor
/// has already processed.
pub trait PrunableCache: Sized {
    /// Number of positions held.
    fn seq_len(&self) -> usize;

    /// Drop the last `discard` positions, returning the truncated state.
    fn prune(self, discard: usize) -> Result<Self>;
}

/// Prune an optional cache; an absent cache stays absent.
pub fn prune_cache<C: PrunableCache>(cache: Option<C>, discard: usize) -> Result<Option<C>> {
    match cache {
        Some(cache) if discard > 0 => {
            let before = cache.seq_len();
            let pruned = cache.prune(discard)?;
            tracing::trace!(before, after = pruned.seq_len(), "pruned cache");
            Ok(Some(pruned))
        }
        other => Ok(other),
    }
}

/// KV cache for a single transformer layer.
#[derive(Debug, Clone, Default)]
pub struct LayerKVCache {
    /// Key cache: [batch, num_kv_heads, seq_len, head_dim]
    key_cache: Option<Tensor>,
    /// Value cache: [batch, num_kv_heads, seq_len, head_dim]
    value_cache: Option<Tensor>,
}

impl LayerKVCache {
    /// Create an empty layer cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the key cache tensor, if anything has been appended.
    pub fn key_cache(&self) -> Option<&Tensor> {
        self.key_cache.as_ref()
    }

    /// Get the value cache tensor, if anything has been appended.
    pub fn value_cache(&self) -> Option<&Tensor> {
        self.value_cache.as_ref()
    }

    /// Number of cached positions.
    pub fn seq_len(&self) -> usize {
        self.key_cache
            .as_ref()
            .and_then(|k| k.dim(SEQ_DIM).ok())
            .unwrap_or(0)
    }

    /// Append new key/value states along the sequence axis.
    pub fn append(&mut self, key: &Tensor, value: &Tensor) -> Result<()> {
        if key.dim(SEQ_DIM)? != value.dim(SEQ_DIM)? {
            return Err(Error::Cache(format!(
                "key and value disagree on new positions: {} vs {}",
                key.dim(SEQ_DIM)?,
                value.dim(SEQ_DIM)?
            )));
        }

        self.key_cache = Some(match self.key_cache.take() {
            Some(cached) => Tensor::cat(&[&cached, key], SEQ_DIM)?,
            None => key.clone(),
        });
        self.value_cache = Some(match self.value_cache.take() {
            Some(cached) => Tensor::cat(&[&cached, value], SEQ_DIM)?,
            None => value.clone(),
        });
        Ok(())
    }

    /// Keep only the first `len` positions.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        let current = self.seq_len();
        if len > current {
            return Err(Error::Cache(format!(
                "cannot truncate {current} cached positions to {len}"
            )));
        }
        if len == 0 {
            self.key_cache = None;
            self.value_cache = None;
            return Ok(());
        }
        if let Some(k) = self.key_cache.take() {
            self.key_cache = Some(k.narrow(SEQ_DIM, 0, len)?);
        }
        if let Some(v) = self.value_cache.take() {
            self.value_cache = Some(v.narrow(SEQ_DIM, 0, len)?);
        }
        Ok(())
    }
}

/// Full KV cache for all transformer layers.
#[derive(Debug, Clone)]
pub struct KVCache {
    /// Per-layer caches.
    layers: Vec<LayerKVCache>,
}

impl KVCache {
    /// Create an empty cache with `num_layers` layers.
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: vec![LayerKVCache::new(); num_layers],
        }
    }

    /// Get the cache for a specific layer.
    pub fn layer(&self, layer_idx: usize) -> Option<&LayerKVCache> {
        self.layers.get(layer_idx)
    }

    /// Get mutable access to a layer's cache.
    pub fn layer_mut(&mut self, layer_idx: usize) -> Option<&mut LayerKVCache> {
        self.layers.get_mut(layer_idx)
    }

    /// Get the number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Append states to one layer.
    pub fn append(&mut self, layer_idx: usize, key: &Tensor, value: &Tensor) -> Result<()> {
        let num_layers = self.layers.len();
        self.layers
            .get_mut(layer_idx)
            .ok_or_else(|| {
                Error::Cache(format!("layer {layer_idx} out of bounds (have {num_layers})"))
            })?
            .append(key, value)
    }
}

impl PrunableCache for KVCache {
    fn seq_len(&self) -> usize {
        self.layers.first().map_or(0, LayerKVCache::seq_len)
    }

    fn prune(mut self, discard: usize) -> Result<Self> {
        let current = self.seq_len();
        if discard > current {
            return Err(Error::Cache(format!(
                "cannot discard {discard} of {current} cached positions"
            )));
        }
        let keep = current - discard;
        for layer in &mut self.layers {
            layer.truncate(keep)?;
        }
        Ok(self)
    }
}
