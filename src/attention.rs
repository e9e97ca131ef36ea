use ndarray::{s, Array2, Array3, Axis};

use crate::common::{softmax_rows, KvCacheEntry, Linear};
use crate::config::T5Config;
use crate::model::ModelError;
use crate::weights::WeightStore;

/// Maps a signed key-minus-query distance to a bucket index.
///
/// Half of the buckets hold exact small distances, the other half grow
/// logarithmically up to `max_distance`. Bidirectional attention splits the
/// range by sign; causal attention only sees the past.
pub fn relative_position_bucket(
    relative_position: i64,
    bidirectional: bool,
    num_buckets: usize,
    max_distance: usize,
) -> usize {
    let mut num_buckets = num_buckets as i64;
    let mut bucket = 0i64;
    let mut distance = relative_position;

    if bidirectional {
        num_buckets /= 2;
        if distance > 0 {
            bucket += num_buckets;
        }
        distance = distance.abs();
    } else {
        distance = -distance.min(0);
    }

    let max_exact = num_buckets / 2;
    if distance < max_exact {
        return (bucket + distance) as usize;
    }

    let log_ratio = (distance as f32 / max_exact as f32).ln() / (max_distance as f32 / max_exact as f32).ln();
    // Float-to-int casts saturate, so a degenerate ratio still lands in range.
    let offset = (log_ratio * (num_buckets - max_exact) as f32) as i64;
    let large = max_exact.saturating_add(offset).clamp(max_exact, num_buckets - 1);
    (bucket + large) as usize
}

#[derive(Debug)]
pub struct T5Attention {
    q: Linear,
    k: Linear,
    v: Linear,
    o: Linear,
    n_heads: usize,
    d_kv: usize,
    relative_attention_bias: Option<Array2<f32>>, // [num_buckets, n_heads]
    num_buckets: usize,
    max_distance: usize,
    bidirectional: bool,
}

impl T5Attention {
    pub fn load(
        weights: &mut WeightStore,
        prefix: &str,
        config: &T5Config,
        has_relative_bias: bool,
        bidirectional: bool,
    ) -> Result<Self, ModelError> {
        let d = config.d_model;
        let inner = config.inner_dim();
        let q = Linear::new(weights.take_matrix(&format!("{}.q.weight", prefix), inner, d)?);
        let k = Linear::new(weights.take_matrix(&format!("{}.k.weight", prefix), inner, d)?);
        let v = Linear::new(weights.take_matrix(&format!("{}.v.weight", prefix), inner, d)?);
        let o = Linear::new(weights.take_matrix(&format!("{}.o.weight", prefix), d, inner)?);

        let relative_attention_bias = if has_relative_bias {
            Some(weights.take_matrix(
                &format!("{}.relative_attention_bias.weight", prefix),
                config.relative_attention_num_buckets,
                config.num_heads,
            )?)
        } else {
            None
        };

        Ok(Self {
            q,
            k,
            v,
            o,
            n_heads: config.num_heads,
            d_kv: config.d_kv,
            relative_attention_bias,
            num_buckets: config.relative_attention_num_buckets,
            max_distance: config.relative_attention_max_distance,
            bidirectional,
        })
    }

    pub fn has_relative_bias(&self) -> bool {
        self.relative_attention_bias.is_some()
    }

    /// Position bias `[n_heads, query_len, key_len]` for queries starting at
    /// absolute position `query_offset`. Causal layers also mask future keys.
    pub fn compute_bias(
        &self,
        query_len: usize,
        key_len: usize,
        query_offset: usize,
    ) -> Result<Array3<f32>, ModelError> {
        let table = self.relative_attention_bias.as_ref().ok_or_else(|| {
            ModelError::Shape("compute_bias called on a layer without relative attention bias".to_string())
        })?;

        let mut bias = Array3::<f32>::zeros((self.n_heads, query_len, key_len));
        for i in 0..query_len {
            let query_position = (i + query_offset) as i64;
            for j in 0..key_len {
                let key_position = j as i64;
                if !self.bidirectional && key_position > query_position {
                    bias.slice_mut(s![.., i, j]).fill(f32::NEG_INFINITY);
                    continue;
                }
                let bucket = relative_position_bucket(
                    key_position - query_position,
                    self.bidirectional,
                    self.num_buckets,
                    self.max_distance,
                );
                bias.slice_mut(s![.., i, j]).assign(&table.row(bucket));
            }
        }
        Ok(bias)
    }

    /// Self-attention when `key_value_states` is `None`, cross-attention otherwise.
    ///
    /// With a cache slot, self-attention appends the new keys/values to it and
    /// cross-attention fills it once and reuses it on later steps.
    pub fn forward(
        &self,
        hidden_states: &Array2<f32>,
        key_value_states: Option<&Array2<f32>>,
        position_bias: Option<&Array3<f32>>,
        cache: Option<&mut Option<KvCacheEntry>>,
    ) -> Result<Array2<f32>, ModelError> {
        let query = self.q.forward(hidden_states)?;

        let (key, value) = match (key_value_states, cache) {
            (None, None) => (self.k.forward(hidden_states)?, self.v.forward(hidden_states)?),
            (None, Some(slot)) => {
                let new_key = self.k.forward(hidden_states)?;
                let new_value = self.v.forward(hidden_states)?;
                if let Some(entry) = slot.as_mut() {
                    entry.append(&new_key, &new_value)?;
                } else {
                    *slot = Some(KvCacheEntry { key: new_key, value: new_value });
                }
                let entry = slot
                    .as_ref()
                    .ok_or_else(|| ModelError::Shape("self-attention cache slot is empty".to_string()))?;
                (entry.key.clone(), entry.value.clone())
            }
            (Some(source), None) => (self.k.forward(source)?, self.v.forward(source)?),
            (Some(source), Some(slot)) => {
                if slot.is_none() {
                    *slot = Some(KvCacheEntry {
                        key: self.k.forward(source)?,
                        value: self.v.forward(source)?,
                    });
                }
                let entry = slot
                    .as_ref()
                    .ok_or_else(|| ModelError::Shape("cross-attention cache slot is empty".to_string()))?;
                (entry.key.clone(), entry.value.clone())
            }
        };

        let query_len = query.nrows();
        let key_len = key.nrows();
        if let Some(bias) = position_bias {
            if bias.shape() != [self.n_heads, query_len, key_len] {
                return Err(ModelError::Shape(format!(
                    "Position bias shape {:?} does not match [{}, {}, {}]",
                    bias.shape(),
                    self.n_heads,
                    query_len,
                    key_len
                )));
            }
        }

        let mut context = Array2::<f32>::zeros((query_len, self.n_heads * self.d_kv));
        for h in 0..self.n_heads {
            let start = h * self.d_kv;
            let end = start + self.d_kv;
            let q_h = query.slice(s![.., start..end]);
            let k_h = key.slice(s![.., start..end]);
            let v_h = value.slice(s![.., start..end]);

            // T5 does not scale scores by 1/sqrt(d_kv); it is folded into the weights.
            let mut scores = q_h.dot(&k_h.t());
            if let Some(bias) = position_bias {
                scores += &bias.index_axis(Axis(0), h);
            }
            softmax_rows(&mut scores);
            context.slice_mut(s![.., start..end]).assign(&scores.dot(&v_h));
        }

        self.o.forward(&context)
    }
}
