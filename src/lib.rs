pub mod attention;
pub mod common;
pub mod config;
pub mod generation;
pub mod loader;
pub mod mlp;
pub mod model;
pub mod pipeline;
pub mod settings;
pub mod system_resources;
pub mod tokenizer;
pub mod ui;
pub mod weights;
