use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::generation::{greedy_generate, GenerationError};
use crate::loader::{LoadError, LoadedModel, ModelStore};
use crate::tokenizer::TokenizerError;

#[derive(Debug)]
pub enum PipelineError {
    Load(LoadError),
    Tokenizer(TokenizerError),
    Generation(GenerationError),
    Blocking(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Load(e) => write!(f, "Model unavailable: {}", e),
            PipelineError::Tokenizer(e) => write!(f, "Tokenizer error: {}", e),
            PipelineError::Generation(e) => write!(f, "Generation failed: {}", e),
            PipelineError::Blocking(s) => write!(f, "Generation task did not complete: {}", s),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Load(e) => Some(e),
            PipelineError::Tokenizer(e) => Some(e),
            PipelineError::Generation(e) => Some(e),
            PipelineError::Blocking(_) => None,
        }
    }
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        PipelineError::Load(err)
    }
}

impl From<TokenizerError> for PipelineError {
    fn from(err: TokenizerError) -> Self {
        PipelineError::Tokenizer(err)
    }
}

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        PipelineError::Generation(err)
    }
}

/// One prompt and what the model made of it.
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: Uuid,
    pub prompt: String,
    pub input_ids: Vec<u32>,
    /// Starts with the decoder start token.
    pub output_ids: Vec<u32>,
    pub output: String,
    pub elapsed: Duration,
}

impl Generation {
    /// Tokens produced by the decoder, start token excluded.
    pub fn generated_tokens(&self) -> usize {
        self.output_ids.len().saturating_sub(1)
    }

    pub fn summary(&self) -> GenerationSummary {
        GenerationSummary {
            id: self.id,
            output: self.output.clone(),
            input_tokens: self.input_ids.len(),
            generated_tokens: self.generated_tokens(),
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// JSON body returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub id: Uuid,
    pub output: String,
    pub input_tokens: usize,
    pub generated_tokens: usize,
    pub elapsed_ms: u64,
}

/// Turns a prompt into generated code. Shared across request workers.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<Generation, PipelineError>;
}

/// Tokenize, greedy-decode and detokenize with a loaded CodeT5 model.
#[derive(Debug, Clone)]
pub struct GenerationPipeline {
    model: Arc<LoadedModel>,
    config: GenerationConfig,
}

impl GenerationPipeline {
    /// Wraps an already loaded model. `max_length` bounds the decoder sequence,
    /// start token included, and must be at least 1 for [`CodeGenerator::generate`]
    /// to succeed.
    pub fn new(model: Arc<LoadedModel>, max_length: usize) -> Self {
        let config = model.generation_config(max_length);
        Self { model, config }
    }

    /// Builds a pipeline over the store's (possibly already loaded) model.
    pub fn from_store(store: &ModelStore, model_path: &Path, max_length: usize) -> Result<Self, PipelineError> {
        let model = store.get_or_load(model_path)?;
        Ok(Self::new(model, max_length))
    }

    pub fn model(&self) -> &Arc<LoadedModel> {
        &self.model
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }
}

impl CodeGenerator for GenerationPipeline {
    fn generate(&self, prompt: &str) -> Result<Generation, PipelineError> {
        let id = Uuid::new_v4();
        let started = Instant::now();
        let tokenizer = self.model.tokenizer();

        let input_ids = tokenizer.encode(prompt)?;
        log::info!(
            "[{}] Generating from {} prompt tokens with {:?}",
            id,
            input_ids.len(),
            self.model.path()
        );
        log::debug!("[{}] Input ids: {:?}", id, input_ids);

        let output_ids = greedy_generate(self.model.model(), &input_ids, &self.config)?;
        let output = tokenizer.decode(&output_ids, true)?;
        let elapsed = started.elapsed();

        log::debug!("[{}] Output ids: {:?}", id, output_ids);
        log::info!(
            "[{}] Generated {} tokens in {:.2?}",
            id,
            output_ids.len().saturating_sub(1),
            elapsed
        );

        Ok(Generation { id, prompt: prompt.to_string(), input_ids, output_ids, output, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(output_ids: Vec<u32>) -> Generation {
        Generation {
            id: Uuid::nil(),
            prompt: "Try to seek to given offset".to_string(),
            input_ids: vec![1, 5, 2],
            output_ids,
            output: "def seek(f, offset):".to_string(),
            elapsed: Duration::from_millis(42),
        }
    }

    #[test]
    fn test_summary_counts_tokens_without_start() {
        let summary = generation(vec![0, 7, 8, 2]).summary();
        assert_eq!(summary.input_tokens, 3);
        assert_eq!(summary.generated_tokens, 3);
        assert_eq!(summary.elapsed_ms, 42);
        assert_eq!(summary.output, "def seek(f, offset):");
    }

    #[test]
    fn test_summary_serializes_expected_fields() {
        let json = serde_json::to_value(generation(vec![0]).summary()).unwrap();
        assert_eq!(json["generated_tokens"], 0);
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        for field in ["output", "input_tokens", "elapsed_ms"] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
    }

    #[test]
    fn test_error_chain_reaches_source() {
        let err = PipelineError::from(GenerationError::InvalidInput("Max length must be greater than 0.".to_string()));
        assert!(err.to_string().starts_with("Generation failed"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&PipelineError::Blocking("canceled".to_string())).is_none());
    }
}
