use std::path::PathBuf;

use clap::{Args, Parser};

fn parse_max_length(s: &str) -> Result<usize, String> {
    let value: usize = s.parse().map_err(|e| format!("'{}' is not a number: {}", s, e))?;
    if value == 0 {
        return Err("Max length must be greater than 0.".to_string());
    }
    Ok(value)
}

/// Where the model lives and how long generations may get.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Directory holding config.json, model.safetensors and the tokenizer files
    #[clap(long, value_parser, default_value = "./CodeT5-base-gen")]
    pub model_path: PathBuf,

    /// Maximum decoder length, start token included
    #[clap(long, value_parser = parse_max_length, default_value_t = 100)]
    pub max_length: usize,
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "MaMaL-Gen code generation demo", long_about = None)]
pub struct ServerArgs {
    #[clap(flatten)]
    pub model: ModelArgs,

    #[clap(long, value_parser, default_value = "127.0.0.1")]
    pub host: String,

    #[clap(long, value_parser, default_value_t = 8080)]
    pub port: u16,

    /// Directory served under /assets
    #[clap(long, value_parser, default_value = "./assets")]
    pub assets_dir: PathBuf,
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Generate code for one prompt with a CodeT5 model", long_about = None)]
pub struct GenerateArgs {
    #[clap(flatten)]
    pub model: ModelArgs,

    #[clap(long, value_parser)]
    pub prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let args = ServerArgs::try_parse_from(["mamal-gen"]).unwrap();
        assert_eq!(args.model.model_path, PathBuf::from("./CodeT5-base-gen"));
        assert_eq!(args.model.max_length, 100);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 8080);
        assert_eq!(args.assets_dir, PathBuf::from("./assets"));
    }

    #[test]
    fn test_server_overrides() {
        let args = ServerArgs::try_parse_from([
            "mamal-gen",
            "--model-path",
            "/models/codet5",
            "--max-length",
            "32",
            "--port",
            "9000",
        ])
        .unwrap();
        assert_eq!(args.model.model_path, PathBuf::from("/models/codet5"));
        assert_eq!(args.model.max_length, 32);
        assert_eq!(args.port, 9000);
    }

    #[test]
    fn test_zero_max_length_is_rejected() {
        assert!(ServerArgs::try_parse_from(["mamal-gen", "--max-length", "0"]).is_err());
        assert!(GenerateArgs::try_parse_from(["generate", "--prompt", "x", "--max-length", "0"]).is_err());
    }

    #[test]
    fn test_generate_requires_prompt() {
        assert!(GenerateArgs::try_parse_from(["generate"]).is_err());
        let args = GenerateArgs::try_parse_from(["generate", "--prompt", "Convert a SVG string to a QImage"]).unwrap();
        assert_eq!(args.prompt, "Convert a SVG string to a QImage");
        assert_eq!(args.model.max_length, 100);
    }
}
