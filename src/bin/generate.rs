use std::error::Error;

use clap::Parser;
use mamal_gen::loader::ModelStore;
use mamal_gen::pipeline::{CodeGenerator, GenerationPipeline, PipelineError};
use mamal_gen::settings::GenerateArgs;

fn run(args: &GenerateArgs) -> Result<(), PipelineError> {
    let store = ModelStore::new();
    let pipeline = GenerationPipeline::from_store(&store, &args.model.model_path, args.model.max_length)?;
    log::debug!("Decoding up to {} tokens with {:?}", pipeline.config().max_length, pipeline.model().path());
    let generation = pipeline.generate(&args.prompt)?;

    log::info!(
        "[{}] {} prompt tokens -> {} generated tokens in {:.2?}",
        generation.id,
        generation.input_ids.len(),
        generation.generated_tokens(),
        generation.elapsed
    );
    println!("{}", generation.output);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = GenerateArgs::parse();

    if let Err(e) = run(&args) {
        eprintln!("Application error: {}", e);
        let mut current_err: Option<&(dyn Error + 'static)> = e.source();
        while let Some(source) = current_err {
            eprintln!("Caused by: {}", source);
            current_err = source.source();
        }
        std::process::exit(1);
    }
}
