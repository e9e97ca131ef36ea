use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error reading config: {}", e),
            ConfigError::Json(e) => write!(f, "Malformed config JSON: {}", e),
            ConfigError::Invalid(s) => write!(f, "Invalid config: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

fn default_num_buckets() -> usize {
    32
}

fn default_max_distance() -> usize {
    128
}

fn default_epsilon() -> f32 {
    1e-6
}

fn default_feed_forward_proj() -> String {
    "relu".to_string()
}

fn default_true() -> bool {
    true
}

fn default_eos() -> u32 {
    2
}

/// T5 architecture hyper-parameters as found in a Hugging Face `config.json`.
///
/// Only the fields needed for inference are read; unknown keys are ignored.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct T5Config {
    pub vocab_size: usize,
    pub d_model: usize,
    pub d_kv: usize,
    pub d_ff: usize,
    pub num_layers: usize,
    #[serde(default)]
    pub num_decoder_layers: Option<usize>,
    pub num_heads: usize,
    #[serde(default = "default_num_buckets")]
    pub relative_attention_num_buckets: usize,
    #[serde(default = "default_max_distance")]
    pub relative_attention_max_distance: usize,
    #[serde(default = "default_epsilon")]
    pub layer_norm_epsilon: f32,
    #[serde(default = "default_feed_forward_proj")]
    pub feed_forward_proj: String,
    #[serde(default = "default_true")]
    pub tie_word_embeddings: bool,
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(default = "default_eos")]
    pub eos_token_id: u32,
    #[serde(default)]
    pub decoder_start_token_id: Option<u32>,
}

/// Feed-forward variant selected by `feed_forward_proj`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedForwardKind {
    Relu,
    GatedGelu,
}

impl T5Config {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let mut file = File::open(config_path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: T5Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vocab_size == 0 || self.d_model == 0 || self.d_kv == 0 || self.num_heads == 0 {
            return Err(ConfigError::Invalid(
                "vocab_size, d_model, d_kv and num_heads must be positive".to_string(),
            ));
        }
        if self.relative_attention_num_buckets < 4 {
            return Err(ConfigError::Invalid(format!(
                "relative_attention_num_buckets must be at least 4, got {}",
                self.relative_attention_num_buckets
            )));
        }
        // Causal buckets keep num_buckets / 2 exact slots; the log-spaced rest must reach past them.
        if self.relative_attention_max_distance <= self.relative_attention_num_buckets / 2 {
            return Err(ConfigError::Invalid(format!(
                "relative_attention_max_distance ({}) must exceed half of relative_attention_num_buckets ({})",
                self.relative_attention_max_distance, self.relative_attention_num_buckets
            )));
        }
        self.feed_forward_kind()?;
        Ok(())
    }

    pub fn feed_forward_kind(&self) -> Result<FeedForwardKind, ConfigError> {
        match self.feed_forward_proj.as_str() {
            "relu" => Ok(FeedForwardKind::Relu),
            "gated-gelu" => Ok(FeedForwardKind::GatedGelu),
            other => Err(ConfigError::Invalid(format!(
                "Unsupported feed_forward_proj '{}'",
                other
            ))),
        }
    }

    pub fn decoder_layers(&self) -> usize {
        self.num_decoder_layers.unwrap_or(self.num_layers)
    }

    pub fn inner_dim(&self) -> usize {
        self.num_heads * self.d_kv
    }

    /// T5 starts decoding from the pad token unless told otherwise.
    pub fn decoder_start(&self) -> u32 {
        self.decoder_start_token_id.unwrap_or(self.pad_token_id)
    }

    /// Every tensor name the model reads from the weights file, with its shape.
    pub fn tensor_shapes(&self) -> Result<Vec<(String, Vec<usize>)>, ConfigError> {
        let d = self.d_model;
        let inner = self.inner_dim();
        let ff_kind = self.feed_forward_kind()?;
        let mut shapes = vec![("shared.weight".to_string(), vec![self.vocab_size, d])];

        let push_attention = |shapes: &mut Vec<(String, Vec<usize>)>, prefix: &str| {
            shapes.push((format!("{}.q.weight", prefix), vec![inner, d]));
            shapes.push((format!("{}.k.weight", prefix), vec![inner, d]));
            shapes.push((format!("{}.v.weight", prefix), vec![inner, d]));
            shapes.push((format!("{}.o.weight", prefix), vec![d, inner]));
        };
        let push_ff = |shapes: &mut Vec<(String, Vec<usize>)>, prefix: &str| {
            match ff_kind {
                FeedForwardKind::Relu => {
                    shapes.push((format!("{}.DenseReluDense.wi.weight", prefix), vec![self.d_ff, d]));
                }
                FeedForwardKind::GatedGelu => {
                    shapes.push((format!("{}.DenseReluDense.wi_0.weight", prefix), vec![self.d_ff, d]));
                    shapes.push((format!("{}.DenseReluDense.wi_1.weight", prefix), vec![self.d_ff, d]));
                }
            }
            shapes.push((format!("{}.DenseReluDense.wo.weight", prefix), vec![d, self.d_ff]));
            shapes.push((format!("{}.layer_norm.weight", prefix), vec![d]));
        };

        for i in 0..self.num_layers {
            let attn = format!("encoder.block.{}.layer.0.SelfAttention", i);
            push_attention(&mut shapes, &attn);
            if i == 0 {
                shapes.push((
                    format!("{}.relative_attention_bias.weight", attn),
                    vec![self.relative_attention_num_buckets, self.num_heads],
                ));
            }
            shapes.push((format!("encoder.block.{}.layer.0.layer_norm.weight", i), vec![d]));
            push_ff(&mut shapes, &format!("encoder.block.{}.layer.1", i));
        }
        shapes.push(("encoder.final_layer_norm.weight".to_string(), vec![d]));

        for i in 0..self.decoder_layers() {
            let attn = format!("decoder.block.{}.layer.0.SelfAttention", i);
            push_attention(&mut shapes, &attn);
            if i == 0 {
                shapes.push((
                    format!("{}.relative_attention_bias.weight", attn),
                    vec![self.relative_attention_num_buckets, self.num_heads],
                ));
            }
            shapes.push((format!("decoder.block.{}.layer.0.layer_norm.weight", i), vec![d]));
            push_attention(&mut shapes, &format!("decoder.block.{}.layer.1.EncDecAttention", i));
            shapes.push((format!("decoder.block.{}.layer.1.layer_norm.weight", i), vec![d]));
            push_ff(&mut shapes, &format!("decoder.block.{}.layer.2", i));
        }
        shapes.push(("decoder.final_layer_norm.weight".to_string(), vec![d]));

        if !self.tie_word_embeddings {
            shapes.push(("lm_head.weight".to_string(), vec![self.vocab_size, d]));
        }
        Ok(shapes)
    }
}

/// Decoding parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Upper bound on the decoder sequence, start token included.
    pub max_length: usize,
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
}

impl GenerationConfig {
    pub fn from_model_config(config: &T5Config, max_length: usize) -> Self {
        Self {
            max_length,
            decoder_start_token_id: config.decoder_start(),
            eos_token_id: config.eos_token_id,
        }
    }
}
