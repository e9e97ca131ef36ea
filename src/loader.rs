use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::config::{ConfigError, GenerationConfig, T5Config};
use crate::model::{ModelError, T5ForConditionalGeneration};
use crate::system_resources::MemorySnapshot;
use crate::tokenizer::{CodeTokenizer, TokenizerError};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

#[derive(Debug)]
pub enum LoadError {
    NotADirectory(PathBuf),
    Config(ConfigError),
    Tokenizer(TokenizerError),
    Model(ModelError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::NotADirectory(path) => write!(f, "Model path {:?} is not a directory", path),
            LoadError::Config(e) => write!(f, "Failed to read model config: {}", e),
            LoadError::Tokenizer(e) => write!(f, "Failed to load tokenizer: {}", e),
            LoadError::Model(e) => write!(f, "Failed to load model weights: {}", e),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::NotADirectory(_) => None,
            LoadError::Config(e) => Some(e),
            LoadError::Tokenizer(e) => Some(e),
            LoadError::Model(e) => Some(e),
        }
    }
}

impl From<ConfigError> for LoadError {
    fn from(err: ConfigError) -> Self {
        LoadError::Config(err)
    }
}

impl From<TokenizerError> for LoadError {
    fn from(err: TokenizerError) -> Self {
        LoadError::Tokenizer(err)
    }
}

impl From<ModelError> for LoadError {
    fn from(err: ModelError) -> Self {
        LoadError::Model(err)
    }
}

/// A tokenizer and model loaded from one directory. Read-only once built.
#[derive(Debug)]
pub struct LoadedModel {
    path: PathBuf,
    tokenizer: CodeTokenizer,
    model: T5ForConditionalGeneration,
}

impl LoadedModel {
    pub fn from_dir(dir: &Path) -> Result<Self, LoadError> {
        if !dir.is_dir() {
            return Err(LoadError::NotADirectory(dir.to_path_buf()));
        }

        let config = T5Config::load(&dir.join(CONFIG_FILE))?;
        log::info!(
            "T5 config: d_model={}, layers={}/{}, heads={}, vocab={}, ff={}",
            config.d_model,
            config.num_layers,
            config.decoder_layers(),
            config.num_heads,
            config.vocab_size,
            config.feed_forward_proj
        );

        let tokenizer = CodeTokenizer::from_dir(dir)?;
        if tokenizer.vocab_size() > config.vocab_size {
            log::warn!(
                "Tokenizer has {} tokens but the model embeds only {}",
                tokenizer.vocab_size(),
                config.vocab_size
            );
        }

        let weights_path = dir.join(WEIGHTS_FILE);
        match fs::metadata(&weights_path) {
            Ok(meta) => MemorySnapshot::capture().log_for_weights(meta.len()),
            Err(e) => log::debug!("Could not stat {:?}: {}", weights_path, e),
        }
        let model = T5ForConditionalGeneration::from_file(config, &weights_path)?;

        Ok(Self { path: dir.to_path_buf(), tokenizer, model })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tokenizer(&self) -> &CodeTokenizer {
        &self.tokenizer
    }

    pub fn model(&self) -> &T5ForConditionalGeneration {
        &self.model
    }

    pub fn generation_config(&self, max_length: usize) -> GenerationConfig {
        GenerationConfig::from_model_config(self.model.config(), max_length)
    }
}

/// Loads each model directory at most once per process.
///
/// Entries are keyed by canonical path. Failed loads are not remembered, so
/// a later call retries from scratch.
#[derive(Debug, Default)]
pub struct ModelStore {
    loaded: Mutex<HashMap<PathBuf, Arc<LoadedModel>>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the model for `path`, loading it on first use.
    ///
    /// `path` is canonicalized first, so `./m`, `m` and `m/.` share one entry and
    /// every call for it returns the same `Arc`.
    ///
    /// # Locking
    /// The store holds a single lock for the whole load. Concurrent first callers
    /// for one path therefore load it once, but a load also blocks lookups of
    /// other paths and [`ModelStore::len`] until it finishes. The service loads
    /// one model at startup, so nothing waits on it at request time.
    ///
    /// # Memory Considerations
    /// The weights file is read fully and widened to `f32` tensors, so peak RAM
    /// is roughly the file size plus the converted tensors. The available memory
    /// is logged against the file size before reading.
    ///
    /// # Returns
    /// - `Ok(Arc<LoadedModel>)`: the cached or freshly loaded model.
    /// - `Err(LoadError::NotADirectory)`: `path` does not exist or is not a directory.
    /// - `Err(LoadError::Config | Tokenizer | Model)`: a file in the directory is
    ///   missing or malformed. Nothing is cached, so a later call retries.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<LoadedModel>, LoadError> {
        let key = fs::canonicalize(path).map_err(|e| {
            log::debug!("Cannot resolve model path {:?}: {}", path, e);
            LoadError::NotADirectory(path.to_path_buf())
        })?;

        // Held across the load below. A panic in another loader leaves the map itself intact.
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = loaded.get(&key) {
            log::debug!("Reusing model loaded from {:?}", key);
            return Ok(Arc::clone(model));
        }

        log::info!("Loading model from {:?}", key);
        let started = Instant::now();
        let model = Arc::new(LoadedModel::from_dir(&key)?);
        log::info!("Model loaded from {:?} in {:.2?}", key, started.elapsed());

        loaded.insert(key, Arc::clone(&model));
        Ok(model)
    }

    pub fn len(&self) -> usize {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
