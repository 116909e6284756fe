#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};

use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageFormat, RgbImage};
use poem::{
    get, handler,
    http::StatusCode,
    listener::TcpAcceptor,
    post,
    web::{Data, Json, Path},
    Body, EndpointExt, IntoEndpoint, IntoResponse, Request, Response, Route, Server,
};
use serde_json::{json, Value};
use vangogh_relay::{
    config::{Backend, Config},
    core::prediction::PollPolicy,
};

pub const TOKEN: &str = "r8_test_token";
pub const GEMINI_KEY: &str = "gk_test";
pub const VERSION: &str = "ver-1";
pub const PREDICTION_ID: &str = "pred-1";

/// Binds a loopback port and serves `ep` on it in the background.
pub async fn serve<E>(ep: E) -> String
where
    E: IntoEndpoint + Send + 'static,
    E::Endpoint: Send + Sync + 'static,
{
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TcpAcceptor::from_std(listener).unwrap();

    tokio::spawn(Server::new_with_acceptor(acceptor).run(ep));
    format!("http://{}", addr)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([30, 60, 160]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

pub fn png_base64(width: u32, height: u32) -> String {
    general_purpose::STANDARD.encode(png(width, height))
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail,
}

/// In-memory stand-in for the Replicate API.
pub struct MockReplicate {
    pub base: OnceLock<String>,
    pub outcome: Outcome,
    /// Number of GETs on the prediction before it settles.
    pub polls_to_settle: usize,
    pub polls: AtomicUsize,
    pub model_lookups: AtomicUsize,
    pub created: Mutex<Vec<Value>>,
    /// How long a create request is held before answering.
    pub create_delay: Duration,
}

impl MockReplicate {
    pub fn new(outcome: Outcome, polls_to_settle: usize) -> Arc<Self> {
        Self::with_create_delay(outcome, polls_to_settle, Duration::ZERO)
    }

    pub fn with_create_delay(
        outcome: Outcome,
        polls_to_settle: usize,
        create_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(MockReplicate {
            base: OnceLock::new(),
            outcome,
            polls_to_settle,
            polls: AtomicUsize::new(0),
            model_lookups: AtomicUsize::new(0),
            created: Mutex::new(vec![]),
            create_delay,
        })
    }

    pub fn final_url(&self) -> String {
        format!("{}/files/final.png", self.base.get().cloned().unwrap_or_default())
    }

    pub fn created_inputs(&self) -> Vec<Value> {
        self.created.lock().unwrap().clone()
    }
}

fn unauthorized(req: &Request) -> Option<Response> {
    let expected = format!("Bearer {}", TOKEN);
    let ok = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if ok {
        None
    } else {
        Some(
            Json(json!({ "detail": "You did not pass a valid authentication token" }))
                .with_status(StatusCode::UNAUTHORIZED)
                .into_response(),
        )
    }
}

#[handler]
fn model(req: &Request, Data(mock): Data<&Arc<MockReplicate>>) -> Response {
    if let Some(resp) = unauthorized(req) {
        return resp;
    }
    mock.model_lookups.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "owner": "jagilley",
        "name": "controlnet-depth-sdxl",
        "latest_version": { "id": VERSION }
    }))
    .into_response()
}

#[handler]
async fn create(req: &Request, body: Body, Data(mock): Data<&Arc<MockReplicate>>) -> Response {
    if let Some(resp) = unauthorized(req) {
        return resp;
    }
    let body: Value = body.into_json().await.unwrap_or(Value::Null);
    mock.created.lock().unwrap().push(body);
    if !mock.create_delay.is_zero() {
        tokio::time::sleep(mock.create_delay).await;
    }

    Json(json!({ "id": PREDICTION_ID, "status": "starting", "output": null }))
        .with_status(StatusCode::CREATED)
        .into_response()
}

#[handler]
fn prediction(
    req: &Request,
    Path(id): Path<String>,
    Data(mock): Data<&Arc<MockReplicate>>,
) -> Response {
    if let Some(resp) = unauthorized(req) {
        return resp;
    }
    if id != PREDICTION_ID {
        return Json(json!({ "detail": "Not found." }))
            .with_status(StatusCode::NOT_FOUND)
            .into_response();
    }

    let n = mock.polls.fetch_add(1, Ordering::SeqCst) + 1;
    let body = if n < mock.polls_to_settle {
        json!({ "id": id, "status": "processing", "output": null })
    } else if mock.outcome == Outcome::Succeed {
        let base = mock.base.get().cloned().unwrap_or_default();
        json!({
            "id": id,
            "status": "succeeded",
            "output": [format!("{base}/files/depth.png"), format!("{base}/files/final.png")]
        })
    } else {
        json!({ "id": id, "status": "failed", "error": "NSFW content detected" })
    };

    Json(body).into_response()
}

#[handler]
fn file(Path(name): Path<String>) -> Vec<u8> {
    format!("painting:{name}").into_bytes()
}

pub async fn spawn_replicate(mock: Arc<MockReplicate>) -> String {
    let app = Route::new()
        .at("/v1/models/:owner/:name", get(model))
        .at("/v1/predictions", post(create))
        .at("/v1/predictions/:id", get(prediction))
        .at("/files/:name", get(file))
        .data(mock.clone());

    let base = serve(app).await;
    let _ = mock.base.set(base.clone());
    base
}

#[handler]
async fn generate_content(req: &Request, body: Body) -> Response {
    let keyed = req
        .uri()
        .query()
        .map(|q| q.contains(&format!("key={}", GEMINI_KEY)))
        .unwrap_or(false);
    if !keyed {
        return Json(json!({ "error": { "code": 400, "message": "API key not valid." } }))
            .with_status(StatusCode::BAD_REQUEST)
            .into_response();
    }

    let body: Value = body.into_json().await.unwrap_or(Value::Null);
    let has_image = body
        .pointer("/contents/0/parts/0/inlineData/data")
        .and_then(Value::as_str)
        .map(|d| !d.is_empty())
        .unwrap_or(false);
    let has_text = body.pointer("/contents/0/parts/1/text").is_some();

    if !(has_image && has_text) {
        return Json(json!({ "error": { "code": 400, "message": "bad parts" } }))
            .with_status(StatusCode::BAD_REQUEST)
            .into_response();
    }

    Json(json!({
        "candidates": [{
            "content": {
                "parts": [
                    { "text": "Here is the painting." },
                    { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
                ]
            }
        }]
    }))
    .into_response()
}

pub async fn spawn_gemini() -> String {
    let app = Route::new().at("/v1beta/models/:model", post(generate_content));
    serve(app).await
}

pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        initial_delay: Duration::from_millis(10),
        factor: 1.5,
        max_delay: Duration::from_millis(40),
        max_wait: Duration::from_secs(10),
    }
}

pub fn replicate_config(base: &str) -> Config {
    let mut config = Config::default();
    config.backend = Backend::Replicate;
    config.replicate.api_token = Some(TOKEN.to_string());
    config.replicate.api_base = format!("{}/v1", base);
    config.poll = fast_poll();
    config.sync_budget = Duration::from_secs(10);
    config
}

pub fn gemini_config(base: &str) -> Config {
    let mut config = Config::default();
    config.backend = Backend::Gemini;
    config.gemini.api_key = Some(GEMINI_KEY.to_string());
    config.gemini.api_base = format!("{}/v1beta", base);
    config
}
