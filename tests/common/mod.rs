use std::collections::HashMap;
use std::fs;
use std::path::Path;

use mamal_gen::config::T5Config;
use safetensors::tensor::{Dtype, TensorView};

pub const TINY_CONFIG: &str = r#"{
    "vocab_size": 10, "d_model": 8, "d_kv": 4, "d_ff": 16,
    "num_layers": 2, "num_heads": 2,
    "relative_attention_num_buckets": 8, "relative_attention_max_distance": 16,
    "feed_forward_proj": "relu", "tie_word_embeddings": true,
    "pad_token_id": 0, "eos_token_id": 2, "decoder_start_token_id": 0
}"#;

/// Writes a complete, tiny CodeT5-shaped model directory: config, weights and
/// a byte-level BPE tokenizer whose vocabulary matches the embedding size.
pub fn write_tiny_model(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("config.json"), TINY_CONFIG).unwrap();

    let vocab = r#"{"<pad>": 0, "<s>": 1, "</s>": 2, "<unk>": 3, "<mask>": 4,
                    "a": 5, "b": 6, "c": 7, "Ġ": 8, "Ġb": 9}"#;
    fs::write(dir.join("vocab.json"), vocab).unwrap();
    fs::write(dir.join("merges.txt"), "#version: 0.2\nĠ b\n").unwrap();

    let config: T5Config = serde_json::from_str(TINY_CONFIG).unwrap();
    let shapes = config.tensor_shapes().unwrap();
    let buffers: Vec<Vec<u8>> = shapes
        .iter()
        .enumerate()
        .map(|(t, (_, shape))| {
            let n: usize = shape.iter().product();
            let values: Vec<f32> = (0..n).map(|i| ((i * 7919 + t * 31 + 17) % 23) as f32 / 23.0 - 0.5).collect();
            bytemuck::cast_slice::<f32, u8>(&values).to_vec()
        })
        .collect();

    let mut views = HashMap::new();
    for ((name, shape), bytes) in shapes.iter().zip(buffers.iter()) {
        views.insert(name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap());
    }
    let serialized = safetensors::serialize(views, &None).unwrap();
    fs::write(dir.join("model.safetensors"), serialized).unwrap();
}
