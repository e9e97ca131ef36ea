use ndarray::{Array1, Array2, Array3};
use std::path::Path;

use crate::attention::T5Attention;
use crate::common::{DecoderKvCache, DecoderLayerCache, Embedding, Linear, RmsNorm};
use crate::config::{ConfigError, T5Config};
use crate::generation::Seq2SeqLm;
use crate::mlp::FeedForward;
use crate::weights::{WeightStore, WeightsError};

#[derive(Debug)]
pub enum ModelError {
    Weights(WeightsError),
    Config(ConfigError),
    Shape(String),
    TokenOutOfVocab { id: u32, vocab_size: usize },
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Weights(e) => write!(f, "Weights error: {}", e),
            ModelError::Config(e) => write!(f, "Config error: {}", e),
            ModelError::Shape(s) => write!(f, "Shape error: {}", s),
            ModelError::TokenOutOfVocab { id, vocab_size } => {
                write!(f, "Token id {} is out of vocab size {}", id, vocab_size)
            }
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Weights(e) => Some(e),
            ModelError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WeightsError> for ModelError {
    fn from(err: WeightsError) -> Self {
        ModelError::Weights(err)
    }
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Config(err)
    }
}

#[derive(Debug)]
struct CrossAttention {
    attention: T5Attention,
    norm: RmsNorm,
}

/// One pre-norm residual block. Decoder blocks carry an extra cross-attention sub-layer.
#[derive(Debug)]
pub struct T5Block {
    self_attn: T5Attention,
    self_attn_norm: RmsNorm,
    cross_attn: Option<CrossAttention>,
    ff: FeedForward,
    ff_norm: RmsNorm,
}

impl T5Block {
    fn load(weights: &mut WeightStore, config: &T5Config, stack: &str, index: usize) -> Result<Self, ModelError> {
        let is_decoder = stack == "decoder";
        let eps = config.layer_norm_epsilon;
        let d = config.d_model;
        let block = format!("{}.block.{}", stack, index);

        let self_attn = T5Attention::load(
            weights,
            &format!("{}.layer.0.SelfAttention", block),
            config,
            index == 0,
            !is_decoder,
        )?;
        let self_attn_norm = RmsNorm::new(weights.take_vector(&format!("{}.layer.0.layer_norm.weight", block), d)?, eps);

        let (cross_attn, ff_layer) = if is_decoder {
            let attention = T5Attention::load(
                weights,
                &format!("{}.layer.1.EncDecAttention", block),
                config,
                false,
                true,
            )?;
            let norm = RmsNorm::new(weights.take_vector(&format!("{}.layer.1.layer_norm.weight", block), d)?, eps);
            (Some(CrossAttention { attention, norm }), 2)
        } else {
            (None, 1)
        };

        let ff_prefix = format!("{}.layer.{}", block, ff_layer);
        let ff = FeedForward::load(weights, &ff_prefix, config)?;
        let ff_norm = RmsNorm::new(weights.take_vector(&format!("{}.layer_norm.weight", ff_prefix), d)?, eps);

        Ok(Self { self_attn, self_attn_norm, cross_attn, ff, ff_norm })
    }

    fn forward(
        &self,
        hidden_states: &Array2<f32>,
        position_bias: &Array3<f32>,
        encoder_hidden_states: Option<&Array2<f32>>,
        cache: Option<&mut DecoderLayerCache>,
    ) -> Result<Array2<f32>, ModelError> {
        let (self_slot, cross_slot) = match cache {
            Some(layer) => (Some(&mut layer.self_attn), Some(&mut layer.cross_attn)),
            None => (None, None),
        };

        let normed = self.self_attn_norm.forward(hidden_states)?;
        let attn_out = self.self_attn.forward(&normed, None, Some(position_bias), self_slot)?;
        let mut hidden = hidden_states + &attn_out;

        if let Some(cross) = &self.cross_attn {
            let encoder_hidden = encoder_hidden_states
                .ok_or_else(|| ModelError::Shape("decoder block requires encoder hidden states".to_string()))?;
            let normed = cross.norm.forward(&hidden)?;
            hidden += &cross.attention.forward(&normed, Some(encoder_hidden), None, cross_slot)?;
        }

        let normed = self.ff_norm.forward(&hidden)?;
        hidden += &self.ff.forward(&normed)?;
        Ok(hidden)
    }
}

#[derive(Debug)]
pub struct T5Stack {
    blocks: Vec<T5Block>,
    final_norm: RmsNorm,
}

impl T5Stack {
    fn load(weights: &mut WeightStore, config: &T5Config, stack: &str, n_blocks: usize) -> Result<Self, ModelError> {
        if n_blocks == 0 {
            return Err(ModelError::Config(ConfigError::Invalid(format!("{} needs at least one block", stack))));
        }
        let mut blocks = Vec::with_capacity(n_blocks);
        for i in 0..n_blocks {
            blocks.push(T5Block::load(weights, config, stack, i)?);
        }
        let final_norm = RmsNorm::new(
            weights.take_vector(&format!("{}.final_layer_norm.weight", stack), config.d_model)?,
            config.layer_norm_epsilon,
        );
        Ok(Self { blocks, final_norm })
    }

    fn encode(&self, embedded: Array2<f32>) -> Result<Array2<f32>, ModelError> {
        let seq_len = embedded.nrows();
        // Block 0 owns the relative bias table; the result is shared by every block.
        let position_bias = self.blocks[0].self_attn.compute_bias(seq_len, seq_len, 0)?;
        let mut hidden = embedded;
        for block in &self.blocks {
            hidden = block.forward(&hidden, &position_bias, None, None)?;
        }
        self.final_norm.forward(&hidden)
    }

    fn decode_step(
        &self,
        embedded: Array2<f32>,
        encoder_hidden_states: &Array2<f32>,
        cache: &mut DecoderKvCache,
    ) -> Result<Array2<f32>, ModelError> {
        if cache.len() != self.blocks.len() {
            return Err(ModelError::Shape(format!(
                "Decoder cache has {} layers, model has {}",
                cache.len(),
                self.blocks.len()
            )));
        }
        let past_len = cache[0].self_attn.as_ref().map_or(0, |entry| entry.len());
        let query_len = embedded.nrows();
        let position_bias = self.blocks[0]
            .self_attn
            .compute_bias(query_len, past_len + query_len, past_len)?;

        let mut hidden = embedded;
        for (block, layer_cache) in self.blocks.iter().zip(cache.iter_mut()) {
            hidden = block.forward(&hidden, &position_bias, Some(encoder_hidden_states), Some(layer_cache))?;
        }
        self.final_norm.forward(&hidden)
    }
}

/// Encoder/decoder T5 with a language-modeling head, batch size 1, inference only.
#[derive(Debug)]
pub struct T5ForConditionalGeneration {
    config: T5Config,
    shared: Embedding,
    encoder: T5Stack,
    decoder: T5Stack,
    lm_head: Option<Linear>,
}

/// Per-request decoding state: the encoder output and the decoder KV cache.
#[derive(Debug)]
pub struct T5DecoderState {
    encoder_hidden_states: Array2<f32>,
    cache: DecoderKvCache,
}

impl T5DecoderState {
    pub fn decoded_len(&self) -> usize {
        self.cache
            .first()
            .and_then(|layer| layer.self_attn.as_ref())
            .map_or(0, |entry| entry.len())
    }
}

impl T5ForConditionalGeneration {
    pub fn load(config: T5Config, weights: &mut WeightStore) -> Result<Self, ModelError> {
        config.validate()?;
        let shared = Embedding::new(weights.take_matrix("shared.weight", config.vocab_size, config.d_model)?);
        let encoder = T5Stack::load(weights, &config, "encoder", config.num_layers)?;
        let decoder = T5Stack::load(weights, &config, "decoder", config.decoder_layers())?;
        let lm_head = if config.tie_word_embeddings {
            None
        } else {
            Some(Linear::new(weights.take_matrix("lm_head.weight", config.vocab_size, config.d_model)?))
        };
        Ok(Self { config, shared, encoder, decoder, lm_head })
    }

    pub fn from_file(config: T5Config, weights_path: &Path) -> Result<Self, ModelError> {
        let mut weights = WeightStore::from_file(weights_path)?;
        let model = Self::load(config, &mut weights)?;
        if !weights.is_empty() {
            log::debug!("Ignoring {} unused tensors: {:?}", weights.len(), weights.remaining_names());
        }
        Ok(model)
    }

    pub fn config(&self) -> &T5Config {
        &self.config
    }

    pub fn encode(&self, input_ids: &[u32]) -> Result<Array2<f32>, ModelError> {
        let embedded = self.shared.forward(input_ids)?;
        self.encoder.encode(embedded)
    }

    pub fn new_decoder_cache(&self) -> DecoderKvCache {
        vec![DecoderLayerCache::default(); self.config.decoder_layers()]
    }

    /// Runs one decoder step for `token` and returns logits over the vocabulary.
    pub fn decode_next(
        &self,
        token: u32,
        encoder_hidden_states: &Array2<f32>,
        cache: &mut DecoderKvCache,
    ) -> Result<Array1<f32>, ModelError> {
        let embedded = self.shared.forward(&[token])?;
        let hidden = self.decoder.decode_step(embedded, encoder_hidden_states, cache)?;
        let last = hidden.row(hidden.nrows() - 1).to_owned();

        let logits = match &self.lm_head {
            Some(head) => head.weight().dot(&last),
            None => {
                // Tied embeddings: rescale before projecting with the shared matrix.
                let scaled = last * (self.config.d_model as f32).powf(-0.5);
                self.shared.weight().dot(&scaled)
            }
        };
        Ok(logits)
    }
}

impl Seq2SeqLm for T5ForConditionalGeneration {
    type State = T5DecoderState;

    fn begin(&self, input_ids: &[u32]) -> Result<Self::State, ModelError> {
        Ok(T5DecoderState {
            encoder_hidden_states: self.encode(input_ids)?,
            cache: self.new_decoder_cache(),
        })
    }

    fn next_logits(&self, state: &mut Self::State, token: u32) -> Result<Array1<f32>, ModelError> {
        self.decode_next(token, &state.encoder_hidden_states, &mut state.cache)
    }
}
