use std::sync::Arc;

use anyhow::Result;
use poem::{
    get, handler,
    http::StatusCode,
    middleware::{CatchPanic, Tracing},
    post,
    web::{Data, Json},
    Endpoint, EndpointExt, Response, Route,
};
use serde_json::{json, Value};

use crate::{
    config::Config,
    core::Generator,
    middleware::{cors_headers, BodyLimitMiddleware},
};

pub mod generate;
pub mod params;
pub mod prediction;
pub mod upload;

pub struct AppState {
    pub config: Config,
    pub generator: Generator,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self> {
        let generator = Generator::from_config(&config)?;
        Ok(AppState { config, generator })
    }
}

#[handler]
fn health(Data(state): Data<&Arc<AppState>>) -> Json<Value> {
    Json(json!({ "status": "ok", "backend": state.generator.name() }))
}

#[handler]
fn preflight() -> Response {
    Response::builder().status(StatusCode::OK).finish()
}

pub fn build_app(state: Arc<AppState>) -> impl Endpoint {
    let max_body_bytes = state.config.max_body_bytes;

    Route::new()
        .at("/health", get(health))
        .at("/api/generate", generate::generate)
        .at("/api/upload", post(upload::upload).options(preflight))
        .at(
            "/api/predictions/:id",
            get(prediction::prediction).options(preflight),
        )
        .with(BodyLimitMiddleware::new(max_body_bytes))
        .with(cors_headers())
        .with(Tracing)
        .with(CatchPanic::new())
        .data(state)
}
