use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokenizers::decoders::DecoderWrapper;
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::pre_tokenizers::PreTokenizerWrapper;
use tokenizers::processors::roberta::RobertaProcessing;
use tokenizers::processors::PostProcessorWrapper;
use tokenizers::{AddedToken, Tokenizer};

const BOS_TOKEN: &str = "<s>";
const EOS_TOKEN: &str = "</s>";
const SPECIAL_TOKENS: [&str; 5] = ["<pad>", BOS_TOKEN, EOS_TOKEN, "<unk>", "<mask>"];

#[derive(Debug)]
pub enum TokenizerError {
    MissingFiles(PathBuf),
    Load(String),
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenizerError::MissingFiles(dir) => write!(
                f,
                "No tokenizer.json or vocab.json + merges.txt found in {:?}",
                dir
            ),
            TokenizerError::Load(s) => write!(f, "Failed to load tokenizer: {}", s),
            TokenizerError::Encode(s) => write!(f, "Encoding failed: {}", s),
            TokenizerError::Decode(s) => write!(f, "Decoding failed: {}", s),
        }
    }
}

impl std::error::Error for TokenizerError {}

/// Byte-level BPE tokenizer in the RoBERTa layout used by CodeT5: `<s> text </s>`.
#[derive(Debug)]
pub struct CodeTokenizer {
    tokenizer: Tokenizer,
}

impl CodeTokenizer {
    /// Loads `tokenizer.json` when present, otherwise assembles the tokenizer from
    /// `vocab.json`, `merges.txt` and an optional `added_tokens.json`.
    pub fn from_dir(dir: &Path) -> Result<Self, TokenizerError> {
        let tokenizer_json = dir.join("tokenizer.json");
        if tokenizer_json.is_file() {
            log::info!("Loading tokenizer from {:?}", tokenizer_json);
            return Self::from_file(&tokenizer_json);
        }

        let vocab = dir.join("vocab.json");
        let merges = dir.join("merges.txt");
        if !vocab.is_file() || !merges.is_file() {
            return Err(TokenizerError::MissingFiles(dir.to_path_buf()));
        }
        log::info!("Building byte-level BPE tokenizer from {:?} and {:?}", vocab, merges);
        let mut tokenizer = Self::from_vocab_and_merges(&vocab, &merges)?;

        let added = dir.join("added_tokens.json");
        if added.is_file() {
            let count = tokenizer.add_special_tokens_from_json(&added)?;
            log::debug!("Registered {} added tokens from {:?}", count, added);
        }
        Ok(tokenizer)
    }

    pub fn from_file(tokenizer_path: &Path) -> Result<Self, TokenizerError> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| TokenizerError::Load(format!("{:?}: {}", tokenizer_path, e)))?;
        Ok(Self { tokenizer })
    }

    pub fn from_vocab_and_merges(vocab_path: &Path, merges_path: &Path) -> Result<Self, TokenizerError> {
        let vocab = vocab_path.to_string_lossy().into_owned();
        let merges = merges_path.to_string_lossy().into_owned();
        let bpe = BPE::from_file(&vocab, &merges)
            .unk_token("<unk>".to_string())
            .build()
            .map_err(|e| TokenizerError::Load(format!("Failed to build BPE model: {}", e)))?;

        let mut tokenizer = Tokenizer::new(bpe);
        let missing: Vec<&str> = [BOS_TOKEN, EOS_TOKEN]
            .into_iter()
            .filter(|t| tokenizer.token_to_id(t).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(TokenizerError::Load(format!("Vocabulary lacks special tokens {:?}", missing)));
        }

        let special: Vec<AddedToken> = SPECIAL_TOKENS
            .iter()
            .filter(|t| tokenizer.token_to_id(t).is_some())
            .map(|t| AddedToken::from(*t, true))
            .collect();
        tokenizer.add_special_tokens(&special);

        let bos_id = tokenizer.token_to_id(BOS_TOKEN).unwrap_or_default();
        let eos_id = tokenizer.token_to_id(EOS_TOKEN).unwrap_or_default();
        tokenizer
            .with_pre_tokenizer(PreTokenizerWrapper::ByteLevel(ByteLevel::default().add_prefix_space(false)))
            .with_decoder(DecoderWrapper::ByteLevel(ByteLevel::default()))
            .with_post_processor(PostProcessorWrapper::Roberta(
                RobertaProcessing::new((EOS_TOKEN.to_string(), eos_id), (BOS_TOKEN.to_string(), bos_id))
                    .add_prefix_space(false),
            ));

        Ok(Self { tokenizer })
    }

    /// Registers every key of a `{"token": id}` map as a special token.
    pub fn add_special_tokens_from_json(&mut self, path: &Path) -> Result<usize, TokenizerError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TokenizerError::Load(format!("{:?}: {}", path, e)))?;
        let added: HashMap<String, u32> = serde_json::from_str(&contents)
            .map_err(|e| TokenizerError::Load(format!("{:?}: {}", path, e)))?;

        let mut tokens: Vec<(String, u32)> = added.into_iter().collect();
        tokens.sort_by_key(|(_, id)| *id);
        let tokens: Vec<AddedToken> = tokens.into_iter().map(|(t, _)| AddedToken::from(t, true)).collect();
        Ok(self.tokenizer.add_special_tokens(&tokens))
    }

    /// Encodes with `<s>`/`</s>` added. Empty text still yields the two special tokens.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| TokenizerError::Encode(format!("'{}': {}", text, e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, TokenizerError> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| TokenizerError::Decode(format!("{:?}: {}", ids, e)))
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    /// Distinct tokens, added tokens included.
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab(true).len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Tiny CodeT5-shaped vocabulary: the five specials, then a handful of byte-level pieces.
    pub(crate) fn write_tiny_tokenizer(dir: &Path) {
        let vocab = r#"{"<pad>": 0, "<s>": 1, "</s>": 2, "<unk>": 3, "<mask>": 4,
                        "a": 5, "b": 6, "c": 7, "Ġ": 8, "Ġb": 9}"#;
        fs::write(dir.join("vocab.json"), vocab).unwrap();
        fs::write(dir.join("merges.txt"), "#version: 0.2\nĠ b\n").unwrap();
    }

    #[test]
    fn test_missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = CodeTokenizer::from_dir(dir.path());
        assert!(matches!(result, Err(TokenizerError::MissingFiles(_))));
    }

    #[test]
    fn test_encode_adds_roberta_specials() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_tokenizer(dir.path());
        let tokenizer = CodeTokenizer::from_dir(dir.path()).expect("tiny tokenizer should load");

        assert_eq!(tokenizer.encode("a b").unwrap(), vec![1, 5, 9, 2]);
        assert_eq!(tokenizer.encode("a c").unwrap(), vec![1, 5, 8, 7, 2]);
        assert_eq!(tokenizer.encode("").unwrap(), vec![1, 2]);
        assert_eq!(tokenizer.vocab_size(), 10);
    }

    #[test]
    fn test_decode_skips_special_tokens() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_tokenizer(dir.path());
        let tokenizer = CodeTokenizer::from_dir(dir.path()).unwrap();

        let ids = tokenizer.encode("a b").unwrap();
        assert_eq!(tokenizer.decode(&ids, true).unwrap(), "a b");
        assert_eq!(tokenizer.decode(&[0, 5, 6, 2, 0], true).unwrap(), "ab");
        assert!(tokenizer.decode(&ids, false).unwrap().contains("<s>"));
    }

    #[test]
    fn test_added_tokens_become_special() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_tokenizer(dir.path());
        fs::write(dir.path().join("added_tokens.json"), r#"{"<extra_id_0>": 10}"#).unwrap();
        let tokenizer = CodeTokenizer::from_dir(dir.path()).unwrap();

        assert_eq!(tokenizer.token_to_id("<extra_id_0>"), Some(10));
        assert_eq!(tokenizer.decode(&[5, 10, 6], true).unwrap(), "ab");
    }

    #[test]
    fn test_vocab_without_specials_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vocab.json"), r#"{"a": 0, "b": 1}"#).unwrap();
        fs::write(dir.path().join("merges.txt"), "#version: 0.2\n").unwrap();
        let err = CodeTokenizer::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("special tokens"));
    }
}
