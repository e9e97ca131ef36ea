use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use mamal_gen::loader::ModelStore;
use mamal_gen::pipeline::GenerationPipeline;
use mamal_gen::settings::ServerArgs;
use mamal_gen::ui::routes::{run_server, AppState};

fn print_error_chain(e: &dyn Error) {
    eprintln!("Application error: {}", e);
    let mut current_err = e.source();
    while let Some(source) = current_err {
        eprintln!("Caused by: {}", source);
        current_err = source.source();
    }
}

#[actix_web::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = ServerArgs::parse();

    // Loaded once here; every request reuses the same handle.
    let store = ModelStore::new();
    let pipeline = match GenerationPipeline::from_store(&store, &args.model.model_path, args.model.max_length) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            print_error_chain(&e);
            std::process::exit(1);
        }
    };

    let state = AppState::new(Arc::new(pipeline));
    if let Err(e) = run_server(&args, state).await {
        print_error_chain(&e);
        std::process::exit(1);
    }
}
