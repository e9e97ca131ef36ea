use ndarray::{concatenate, Array1, Array2, Axis};

use crate::model::ModelError;

/// T5 layer norm: scales by the root mean square only. No mean subtraction, no bias.
#[derive(Debug)]
pub struct RmsNorm {
    weight: Array1<f32>,
    epsilon: f32,
}

impl RmsNorm {
    pub fn new(weight: Array1<f32>, epsilon: f32) -> Self {
        Self { weight, epsilon }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>, ModelError> {
        if x.ncols() != self.weight.len() {
            return Err(ModelError::Shape(format!(
                "RmsNorm expects {} features, got {}",
                self.weight.len(),
                x.ncols()
            )));
        }
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            let variance = row.iter().map(|v| v * v).sum::<f32>() / row.len() as f32;
            let scale = 1.0 / (variance + self.epsilon).sqrt();
            row.zip_mut_with(&self.weight, |v, &w| *v = *v * scale * w);
        }
        Ok(out)
    }
}

/// Bias-free projection. `weight` is stored `[out_features, in_features]` as in the checkpoint.
#[derive(Debug)]
pub struct Linear {
    weight: Array2<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>) -> Self {
        Self { weight }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>, ModelError> {
        if x.ncols() != self.weight.ncols() {
            return Err(ModelError::Shape(format!(
                "Linear expects {} input features, got {}",
                self.weight.ncols(),
                x.ncols()
            )));
        }
        Ok(x.dot(&self.weight.t()))
    }
}

#[derive(Debug)]
pub struct Embedding {
    weight: Array2<f32>,
}

impl Embedding {
    pub fn new(weight: Array2<f32>) -> Self {
        Self { weight }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn forward(&self, ids: &[u32]) -> Result<Array2<f32>, ModelError> {
        let vocab_size = self.weight.nrows();
        let mut out = Array2::zeros((ids.len(), self.weight.ncols()));
        for (row, &id) in ids.iter().enumerate() {
            if id as usize >= vocab_size {
                return Err(ModelError::TokenOutOfVocab { id, vocab_size });
            }
            out.row_mut(row).assign(&self.weight.row(id as usize));
        }
        Ok(out)
    }
}

/// Row-wise softmax. Rows that are fully masked (`-inf`) become all zeros.
pub fn softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        if !max.is_finite() {
            row.fill(0.0);
            continue;
        }
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

// KV cache related type definitions

/// Keys and values of one attention layer, `[seq_len, n_heads * d_kv]`.
#[derive(Debug, Clone)]
pub struct KvCacheEntry {
    pub key: Array2<f32>,
    pub value: Array2<f32>,
}

impl KvCacheEntry {
    pub fn len(&self) -> usize {
        self.key.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.key.nrows() == 0
    }

    pub fn append(&mut self, key: &Array2<f32>, value: &Array2<f32>) -> Result<(), ModelError> {
        self.key = concatenate(Axis(0), &[self.key.view(), key.view()])
            .map_err(|e| ModelError::Shape(format!("Failed to extend key cache: {}", e)))?;
        self.value = concatenate(Axis(0), &[self.value.view(), value.view()])
            .map_err(|e| ModelError::Shape(format!("Failed to extend value cache: {}", e)))?;
        Ok(())
    }
}

/// Cache for a single decoder block: growing self-attention K/V and the
/// cross-attention K/V computed once from the encoder output.
#[derive(Debug, Clone, Default)]
pub struct DecoderLayerCache {
    pub self_attn: Option<KvCacheEntry>,
    pub cross_attn: Option<KvCacheEntry>,
}

// Full cache for the decoder, one entry per block
pub type DecoderKvCache = Vec<DecoderLayerCache>;
