//! # Web Server Routes for the Code Generation Demo
//!
//! Handlers for the demo page, the form submission that triggers generation,
//! and a small JSON API over the same generator. Generation is CPU-bound, so it
//! always runs on actix's blocking pool.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use actix_files::Files;
use actix_web::dev::Server;
use actix_web::http::StatusCode;
use actix_web::{middleware, web, App, HttpResponse, HttpServer, ResponseError};
use serde::Deserialize;

use crate::pipeline::{CodeGenerator, Generation, PipelineError};
use crate::settings::ServerArgs;
use crate::ui::page::{render_error_page, render_page, OutputPanel};

/// State shared by every worker: the generator built once at startup.
#[derive(Clone)]
pub struct AppState {
    generator: Arc<dyn CodeGenerator>,
}

impl AppState {
    pub fn new(generator: Arc<dyn CodeGenerator>) -> Self {
        Self { generator }
    }
}

/// Fields posted by the page form. `trigger` is only sent when the button is pressed.
#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    #[serde(default)]
    pub input: String,
    pub trigger: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub input: String,
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(&format!("\nCaused by: {}", cause));
            source = cause.source();
        }
        HttpResponse::build(self.status_code())
            .content_type("text/html; charset=utf-8")
            .body(render_error_page(&message))
    }
}

async fn run_generation(state: &AppState, prompt: String) -> Result<Generation, PipelineError> {
    let generator = Arc::clone(&state.generator);
    web::block(move || generator.generate(&prompt))
        .await
        .map_err(|e| PipelineError::Blocking(e.to_string()))?
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(body)
}

/// Serves the page with an empty input and the output placeholder.
pub async fn index() -> HttpResponse {
    html(render_page("", OutputPanel::Placeholder))
}

/// Handles the form. Without `trigger` the page is re-rendered with the
/// submitted input and the placeholder, and the model is not touched.
pub async fn generate_form(
    state: web::Data<AppState>,
    form: web::Form<GenerateForm>,
) -> Result<HttpResponse, PipelineError> {
    let form = form.into_inner();
    if form.trigger.is_none() {
        log::debug!("Form submitted without trigger; skipping generation");
        return Ok(html(render_page(&form.input, OutputPanel::Placeholder)));
    }

    let generation = run_generation(&state, form.input.clone()).await?;
    Ok(html(render_page(&form.input, OutputPanel::Generated(&generation.output))))
}

/// JSON variant of the trigger: always generates.
pub async fn api_generate(
    state: web::Data<AppState>,
    request: web::Json<GenerateRequest>,
) -> HttpResponse {
    match run_generation(&state, request.into_inner().input).await {
        Ok(generation) => HttpResponse::Ok().json(generation.summary()),
        Err(e) => {
            log::error!("API generation failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

/// Body limit for the form and JSON extractors. Prompts themselves are not length-checked.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Registers the page and API routes. Static assets are mounted separately.
///
/// Also raises the form and JSON payload limits to [`MAX_BODY_BYTES`], so long
/// prompts reach the generator instead of failing with `413 Payload Too Large`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::FormConfig::default().limit(MAX_BODY_BYTES))
        .app_data(web::JsonConfig::default().limit(MAX_BODY_BYTES))
        .route("/", web::get().to(index))
        .route("/generate", web::post().to(generate_form))
        .route("/api/generate", web::post().to(api_generate));
}

/// Builds the server on an already bound listener.
///
/// The returned [`Server`] is not yet polled; await it (or spawn it) to start
/// accepting connections. Every worker shares one `AppState`, so the model is
/// loaded exactly once no matter how many workers actix starts.
///
/// # Returns
/// - `Ok(Server)` once the listener is registered.
/// - `Err` if actix cannot take over the listener.
pub fn serve(listener: TcpListener, state: AppState, assets_dir: PathBuf) -> std::io::Result<Server> {
    let data = web::Data::new(state);
    if !assets_dir.is_dir() {
        log::warn!("Assets directory {:?} not found; images will 404", assets_dir);
    }
    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(data.clone())
            .configure(configure)
            .service(Files::new("/assets", assets_dir.clone()))
    })
    .listen(listener)?
    .run();
    Ok(server)
}

/// Binds `host:port` from the settings and runs until shutdown.
///
/// The assets directory is resolved once here; a missing directory only
/// produces a warning and 404s for the images.
///
/// # Returns
/// A `std::io::Result<()>` which is `Ok(())` when the server shuts down cleanly,
/// or an `Err` if the address cannot be bound or the server fails while running.
pub async fn run_server(settings: &ServerArgs, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind((settings.host.as_str(), settings.port))?;
    log::info!("Starting server at http://{}/", listener.local_addr()?);
    serve(listener, state, assets_path(&settings.assets_dir))?.await
}

fn assets_path(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationError;
    use crate::pipeline::GenerationSummary;
    use crate::ui::page::{OUTPUT_HEADING, PLACEHOLDER};
    use actix_web::test;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Echoes a fixed snippet and counts how often it ran.
    struct StubGenerator {
        output: String,
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubGenerator {
        fn new(output: &str) -> Arc<Self> {
            Arc::new(Self { output: output.to_string(), calls: AtomicUsize::new(0), fail: false })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { output: String::new(), calls: AtomicUsize::new(0), fail: true })
        }
    }

    impl CodeGenerator for StubGenerator {
        fn generate(&self, prompt: &str) -> Result<Generation, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GenerationError::InvalidInput("Max length must be greater than 0.".to_string()).into());
            }
            Ok(Generation {
                id: Uuid::new_v4(),
                prompt: prompt.to_string(),
                input_ids: vec![1, 2],
                output_ids: vec![0, 5, 6, 2],
                output: self.output.clone(),
                elapsed: Duration::from_millis(3),
            })
        }
    }

    async fn body_string(resp: actix_web::dev::ServiceResponse) -> String {
        let bytes = test::read_body(resp).await;
        String::from_utf8(bytes.to_vec()).expect("body should be UTF-8")
    }

    macro_rules! app {
        ($stub:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(AppState::new($stub.clone())))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn test_index_shows_placeholder() {
        let stub = StubGenerator::new("def f(): pass");
        let app = app!(stub);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.contains(PLACEHOLDER));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_rt::test]
    async fn test_form_without_trigger_does_not_generate() {
        let stub = StubGenerator::new("def f(): pass");
        let app = app!(stub);
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_form([("input", "Try to seek to given offset")])
            .to_request();
        let body = body_string(test::call_service(&app, req).await).await;

        assert!(body.contains(PLACEHOLDER), "placeholder should be shown");
        assert!(!body.contains("def f(): pass"));
        assert!(body.contains(">Try to seek to given offset</textarea>"), "input should be kept");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_rt::test]
    async fn test_triggered_form_renders_python_block() {
        let stub = StubGenerator::new("def svg_to_qimage(svg):\n    return QImage.fromData(svg)");
        let app = app!(stub);
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_form([("input", "Convert a SVG string to a QImage"), ("trigger", "生成")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;

        let heading = body.find(OUTPUT_HEADING).expect("output heading missing");
        let block = body
            .find("<code class=\"language-python\">def svg_to_qimage(svg):")
            .expect("python code block missing");
        assert!(heading < block, "code block should follow the output heading");
        assert!(!body.contains(PLACEHOLDER));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn test_generated_output_is_escaped() {
        let stub = StubGenerator::new("print('<b>')");
        let app = app!(stub);
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_form([("input", "<b>"), ("trigger", "1")])
            .to_request();
        let body = body_string(test::call_service(&app, req).await).await;
        assert!(body.contains("print('&lt;b&gt;')"));
        assert!(!body.contains("<b>"));
    }

    #[actix_rt::test]
    async fn test_generation_failure_is_500_page() {
        let stub = StubGenerator::failing();
        let app = app!(stub);
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_form([("input", ""), ("trigger", "1")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(resp).await;
        assert!(body.contains("Application error"));
        assert!(body.contains("Max length must be greater than 0."));
    }

    #[actix_rt::test]
    async fn test_api_returns_summary() {
        let stub = StubGenerator::new("return offset");
        let app = app!(stub);
        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(serde_json::json!({ "input": "Try to seek to given offset" }))
            .to_request();
        let summary: GenerationSummary = test::call_and_read_body_json(&app, req).await;
        assert_eq!(summary.output, "return offset");
        assert_eq!(summary.input_tokens, 2);
        assert_eq!(summary.generated_tokens, 3);
    }

    #[actix_rt::test]
    async fn test_long_form_input_reaches_generator() {
        let stub = StubGenerator::new("pass");
        let app = app!(stub);
        let prompt = "a".repeat(20_000);
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_form([("input", prompt.as_str()), ("trigger", "1")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK, "long input should not be rejected");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn test_long_json_input_reaches_generator() {
        let stub = StubGenerator::new("pass");
        let app = app!(stub);
        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(serde_json::json!({ "input": "b".repeat(3 * 1024 * 1024) }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn test_api_failure_is_json_error() {
        let stub = StubGenerator::failing();
        let app = app!(stub);
        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(serde_json::json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert!(value["error"].as_str().unwrap_or_default().contains("Generation failed"));
    }
}
