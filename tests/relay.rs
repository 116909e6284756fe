mod common;

use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};

use common::*;
use poem::{
    http::StatusCode,
    test::{TestClient, TestForm, TestFormField, TestResponse},
};
use serde_json::{json, Value};
use vangogh_relay::{build_app, AppState, Config};

async fn json_body(resp: TestResponse) -> Value {
    resp.0.into_body().into_json().await.unwrap()
}

fn relay(config: Config) -> TestClient<impl poem::Endpoint> {
    let state = AppState::from_config(config).unwrap();
    TestClient::new(build_app(Arc::new(state)))
}

#[tokio::test]
async fn generate_returns_last_output_url() {
    let mock = MockReplicate::new(Outcome::Succeed, 2);
    let base = spawn_replicate(mock.clone()).await;
    let cli = relay(replicate_config(&base));

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "imageBase64": png_base64(900, 600), "mimeType": "image/png" }))
        .send()
        .await;
    resp.assert_status_is_ok();

    let body = json_body(resp).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["id"], PREDICTION_ID);
    assert_eq!(body["output"], mock.final_url());
    assert_eq!(body["rawOutput"].as_array().map(Vec::len), Some(2));

    let created = mock.created_inputs();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["version"], VERSION);
    let input = &created[0]["input"];
    assert!(input["image"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
    assert!(input["prompt"].as_str().unwrap().contains("Van Gogh"));
    assert_eq!(input["num_inference_steps"], 40);
}

#[tokio::test]
async fn model_version_is_looked_up_once() {
    let mock = MockReplicate::new(Outcome::Succeed, 1);
    let base = spawn_replicate(mock.clone()).await;
    let cli = relay(replicate_config(&base));

    for _ in 0..2 {
        cli.post("/api/generate")
            .body_json(&json!({ "image": png_base64(32, 32) }))
            .send()
            .await
            .assert_status_is_ok();
    }

    assert_eq!(mock.model_lookups.load(Ordering::SeqCst), 1);
    assert_eq!(mock.created_inputs().len(), 2);
}

#[tokio::test]
async fn remote_image_url_is_forwarded_untouched() {
    let mock = MockReplicate::new(Outcome::Succeed, 1);
    let base = spawn_replicate(mock.clone()).await;
    let cli = relay(replicate_config(&base));

    cli.post("/api/generate")
        .body_json(&json!({ "imageUrl": "https://cdn.example.com/me.jpg", "prompt": "a sunflower field" }))
        .send()
        .await
        .assert_status_is_ok();

    let created = mock.created_inputs();
    assert_eq!(created[0]["input"]["image"], "https://cdn.example.com/me.jpg");
    assert_eq!(created[0]["input"]["prompt"], "a sunflower field");
}

#[tokio::test]
async fn failed_prediction_is_bad_gateway() {
    let mock = MockReplicate::new(Outcome::Fail, 1);
    let base = spawn_replicate(mock).await;
    let cli = relay(replicate_config(&base));

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": png_base64(16, 16) }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(
        json_body(resp).await,
        json!({ "error": "NSFW content detected" })
    );
}

#[tokio::test]
async fn vendor_rejection_is_relayed_with_its_detail() {
    let mock = MockReplicate::new(Outcome::Succeed, 1);
    let base = spawn_replicate(mock).await;
    let mut config = replicate_config(&base);
    config.replicate.api_token = Some("r8_wrong".to_string());
    let cli = relay(config);

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": png_base64(16, 16) }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(
        json_body(resp).await["error"],
        "You did not pass a valid authentication token"
    );
}

#[tokio::test]
async fn slow_prediction_is_deferred_then_polled() {
    let mock = MockReplicate::new(Outcome::Succeed, 3);
    let base = spawn_replicate(mock.clone()).await;
    let mut config = replicate_config(&base);
    config.sync_budget = Duration::from_millis(1);
    let cli = relay(config);

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": png_base64(16, 16) }))
        .send()
        .await;
    resp.assert_status(StatusCode::ACCEPTED);
    let pending = json_body(resp).await;
    assert_eq!(pending["id"], PREDICTION_ID);
    let poll_url = pending["pollUrl"].as_str().unwrap().to_string();
    assert_eq!(poll_url, format!("/api/predictions/{}", PREDICTION_ID));

    let mut last = StatusCode::ACCEPTED;
    let mut body = Value::Null;
    for _ in 0..5 {
        let resp = cli.get(&poll_url).send().await;
        last = resp.0.status();
        body = json_body(resp).await;
        if last != StatusCode::ACCEPTED {
            break;
        }
        assert_eq!(body["status"], "processing");
    }

    assert_eq!(last, StatusCode::OK);
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["output"], mock.final_url());
}

#[tokio::test]
async fn unknown_prediction_is_reported() {
    let mock = MockReplicate::new(Outcome::Succeed, 1);
    let base = spawn_replicate(mock).await;
    let cli = relay(replicate_config(&base));

    let resp = cli.get("/api/predictions/nope").send().await;
    resp.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(resp).await["error"], "Not found.");
}

#[tokio::test]
async fn multipart_upload_is_compressed_and_generated() {
    let mock = MockReplicate::new(Outcome::Succeed, 1);
    let base = spawn_replicate(mock.clone()).await;
    let cli = relay(replicate_config(&base));

    let form = TestForm::new()
        .field(
            TestFormField::bytes(png(1200, 800))
                .name("image")
                .filename("me.png")
                .content_type("image/png"),
        )
        .field(TestFormField::text("night cafe").name("prompt"));

    let resp = cli.post("/api/upload").multipart(form).send().await;
    resp.assert_status_is_ok();
    assert_eq!(json_body(resp).await["output"], mock.final_url());

    let created = mock.created_inputs();
    assert_eq!(created[0]["input"]["prompt"], "night cafe");
    assert!(created[0]["input"]["image"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn gemini_backend_answers_synchronously() {
    let base = spawn_gemini().await;
    let cli = relay(gemini_config(&base));

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": png_base64(64, 64) }))
        .send()
        .await;
    resp.assert_status_is_ok();
    let body = json_body(resp).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["output"], "data:image/png;base64,iVBORw0KGgo=");
    assert!(body.get("id").is_none());

    let resp = cli.get("/api/predictions/anything").send().await;
    resp.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(resp).await["error"],
        "Polling is not supported by the gemini backend"
    );
}

#[tokio::test]
async fn gemini_api_errors_surface_their_message() {
    let base = spawn_gemini().await;
    let mut config = gemini_config(&base);
    config.gemini.api_key = Some("wrong".to_string());
    let cli = relay(config);

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": png_base64(8, 8) }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(resp).await["error"], "API key not valid.");
}

#[tokio::test]
async fn request_validation() {
    let mut config = Config::default();
    config.replicate.api_token = Some(TOKEN.to_string());
    let cli = relay(config);

    let resp = cli.post("/api/generate").body("{not json").send().await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await, json!({ "error": "Invalid JSON" }));

    let resp = cli.post("/api/generate").body_json(&json!({})).send().await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await, json!({ "error": "No image provided" }));

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": "bm90IGFuIGltYWdl" }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await, json!({ "error": "Invalid image data" }));

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "imageUrl": "file:///etc/passwd" }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await, json!({ "error": "Invalid imageUrl" }));

    let resp = cli.post("/api/upload").multipart(TestForm::new()).send().await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

fn error_text(body: &Value) -> &str {
    body["error"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn broken_uploads_name_the_problem() {
    let mut config = Config::default();
    config.replicate.api_token = Some(TOKEN.to_string());
    let cli = relay(config);

    let resp = cli
        .post("/api/upload")
        .content_type("text/plain")
        .body("just text")
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert!(error_text(&body).starts_with("Invalid multipart body"), "{body}");

    let resp = cli
        .post("/api/upload")
        .content_type("multipart/form-data; boundary=XYZ")
        .body("--XYZ\r\nContent-Disposition: form-data; name=\"image\"; filename=\"me.png\"\r\n\r\nPNG")
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert!(error_text(&body).starts_with("Invalid multipart body"), "{body}");
}

#[tokio::test]
async fn oversized_json_body_is_413() {
    let mut config = Config::default();
    config.replicate.api_token = Some(TOKEN.to_string());
    config.max_body_bytes = 256;
    let cli = relay(config);

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": "A".repeat(1024) }))
        .send()
        .await;
    resp.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(resp).await, json!({ "error": "Payload too large" }));
}

#[tokio::test]
async fn path_ids_cannot_escape_the_predictions_endpoint() {
    let mock = MockReplicate::new(Outcome::Succeed, 1);
    let base = spawn_replicate(mock.clone()).await;
    let cli = relay(replicate_config(&base));

    let resp = cli
        .get("/api/predictions/..%2F..%2Faccount")
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(resp).await,
        json!({ "error": "Invalid prediction id" })
    );
    assert_eq!(mock.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn budget_counts_from_request_arrival() {
    let mock = MockReplicate::with_create_delay(Outcome::Succeed, 50, Duration::from_secs(2));
    let base = spawn_replicate(mock.clone()).await;
    let mut config = replicate_config(&base);
    config.sync_budget = Duration::from_secs(1);
    let cli = relay(config);

    let started = Instant::now();
    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": png_base64(16, 16) }))
        .send()
        .await;
    let elapsed = started.elapsed();

    resp.assert_status(StatusCode::ACCEPTED);
    assert_eq!(json_body(resp).await["id"], PREDICTION_ID);
    // the slow create already spent the budget, so no polling follows it
    assert!(elapsed < Duration::from_millis(2800), "took {elapsed:?}");
    assert_eq!(mock.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn responses_allow_any_origin() {
    let mut config = Config::default();
    config.replicate.api_token = Some(TOKEN.to_string());
    let cli = relay(config);

    let resp = cli
        .post("/api/generate")
        .header("origin", "https://site.example")
        .body_json(&json!({}))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    resp.assert_header("access-control-allow-origin", "*");
    resp.assert_header("access-control-allow-methods", "GET, POST, OPTIONS");
    resp.assert_header("access-control-allow-headers", "Content-Type");

    let resp = cli
        .options("/api/upload")
        .header("origin", "https://site.example")
        .header("access-control-request-method", "POST")
        .send()
        .await;
    resp.assert_status_is_ok();
    resp.assert_header("access-control-allow-origin", "*");
}

#[tokio::test]
async fn method_and_credential_checks() {
    let cli = relay(Config::default());

    let resp = cli.get("/api/generate").send().await;
    resp.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        json_body(resp).await,
        json!({ "error": "Method not allowed. Use POST." })
    );

    cli.options("/api/generate").send().await.assert_status_is_ok();

    let resp = cli
        .post("/api/generate")
        .body_json(&json!({ "image": "AAAA" }))
        .send()
        .await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(resp).await,
        json!({ "error": "Missing REPLICATE_API_TOKEN" })
    );

    let resp = cli.get("/health").send().await;
    resp.assert_status_is_ok();
    assert_eq!(
        json_body(resp).await,
        json!({ "status": "ok", "backend": "replicate" })
    );
}
