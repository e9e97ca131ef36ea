use ndarray::Array1;
use ndarray_stats::QuantileExt;

use crate::config::GenerationConfig;
use crate::model::ModelError;

#[derive(Debug)]
pub enum GenerationError {
    Model(ModelError),
    InvalidInput(String),
    InvalidLogits(String),
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::Model(e) => write!(f, "Model error: {}", e),
            GenerationError::InvalidInput(s) => write!(f, "Invalid input: {}", s),
            GenerationError::InvalidLogits(s) => write!(f, "Invalid logits: {}", s),
        }
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerationError::Model(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ModelError> for GenerationError {
    fn from(err: ModelError) -> Self {
        GenerationError::Model(err)
    }
}

/// An encoder/decoder language model that can be stepped one decoder token at a time.
pub trait Seq2SeqLm {
    /// Everything a request carries between steps (encoder output, caches).
    type State;

    /// Runs the encoder over `input_ids` and prepares an empty decoder state.
    fn begin(&self, input_ids: &[u32]) -> Result<Self::State, ModelError>;

    /// Feeds `token` to the decoder and returns logits for the next position.
    fn next_logits(&self, state: &mut Self::State, token: u32) -> Result<Array1<f32>, ModelError>;
}

fn argmax(logits: &Array1<f32>) -> Result<u32, GenerationError> {
    logits
        .argmax()
        .map(|idx| idx as u32)
        .map_err(|e| GenerationError::InvalidLogits(format!("{} ({} logits)", e, logits.len())))
}

/// Greedy decoding. The returned sequence starts with the decoder start token,
/// ends with EOS if one was produced, and never exceeds `config.max_length`.
pub fn greedy_generate<M: Seq2SeqLm>(
    model: &M,
    input_ids: &[u32],
    config: &GenerationConfig,
) -> Result<Vec<u32>, GenerationError> {
    if config.max_length == 0 {
        return Err(GenerationError::InvalidInput("Max length must be greater than 0.".to_string()));
    }

    let mut state = model.begin(input_ids)?;
    let mut generated = Vec::with_capacity(config.max_length);
    generated.push(config.decoder_start_token_id);

    while generated.len() < config.max_length {
        let last = generated[generated.len() - 1];
        let logits = model.next_logits(&mut state, last)?;
        let next = argmax(&logits)?;
        generated.push(next);
        if next == config.eos_token_id {
            log::debug!("EOS reached after {} tokens", generated.len());
            break;
        }
    }

    Ok(generated)
}
