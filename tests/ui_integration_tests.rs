mod common;

use std::net::TcpListener;
use std::sync::Arc;

use awc::Client;
use mamal_gen::loader::ModelStore;
use mamal_gen::pipeline::{GenerationPipeline, GenerationSummary};
use mamal_gen::ui::page::{OUTPUT_HEADING, PLACEHOLDER};
use mamal_gen::ui::routes::{serve, AppState};

#[actix_rt::test]
async fn test_server_end_to_end_with_tiny_model() {
    let model_dir = tempfile::tempdir().unwrap();
    common::write_tiny_model(model_dir.path());
    let assets_dir = tempfile::tempdir().unwrap();
    std::fs::write(assets_dir.path().join("panda23.png"), b"\x89PNG\r\n\x1a\n").unwrap();

    let store = ModelStore::new();
    let pipeline = GenerationPipeline::from_store(&store, model_dir.path(), 8).expect("tiny model should load");
    let state = AppState::new(Arc::new(pipeline));

    // Port 0 lets the OS pick a free port.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = serve(listener, state, assets_dir.path().to_path_buf()).expect("server should start");
    let handle = server.handle();
    actix_rt::spawn(server);

    let client = Client::default();
    let base = format!("http://{}", addr);

    let mut response = client.get(format!("{}/", base)).send().await.expect("GET / failed");
    assert_eq!(response.status().as_u16(), 200);
    let body = response.body().await.unwrap();
    let body_str = std::str::from_utf8(&body).expect("Response body was not valid UTF-8");
    assert!(body_str.contains(PLACEHOLDER), "index should show the placeholder");

    let mut response = client
        .post(format!("{}/generate", base))
        .send_form(&[("input", "Convert a SVG string to a QImage")])
        .await
        .expect("POST /generate failed");
    assert_eq!(response.status().as_u16(), 200);
    let body = response.body().await.unwrap();
    let body_str = std::str::from_utf8(&body).unwrap();
    assert!(body_str.contains(PLACEHOLDER), "no trigger means no generation");
    assert!(!body_str.contains(OUTPUT_HEADING));

    let mut response = client
        .post(format!("{}/generate", base))
        .send_form(&[("input", "Convert a SVG string to a QImage"), ("trigger", "生成")])
        .await
        .expect("POST /generate with trigger failed");
    assert_eq!(response.status().as_u16(), 200);
    let body = response.body().await.unwrap();
    let body_str = std::str::from_utf8(&body).unwrap();
    assert!(body_str.contains(OUTPUT_HEADING), "triggered form should show the output heading");
    assert!(body_str.contains("<code class=\"language-python\">"));
    assert!(!body_str.contains(PLACEHOLDER));

    let mut response = client
        .post(format!("{}/api/generate", base))
        .send_json(&serde_json::json!({ "input": "" }))
        .await
        .expect("POST /api/generate failed");
    assert_eq!(response.status().as_u16(), 200);
    let summary: GenerationSummary = response.json().await.unwrap();
    assert_eq!(summary.input_tokens, 2);
    assert!(summary.generated_tokens < 8);

    let response = client.get(format!("{}/assets/panda23.png", base)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    handle.stop(true).await;
}
