use std::sync::Arc;

use poem::{
    error::ReadBodyError,
    handler,
    http::{Method, StatusCode},
    web::{Data, Json},
    Body, IntoResponse, Request, Response,
};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::{
    params::generate_params::{GenerateParams, ImageSource},
    AppState,
};
use crate::{
    core::{
        compress::compress,
        data_url::{parse_data_url, to_data_url},
        prediction::PredictionStatus,
        style::StylePreset,
        Generation,
    },
    error::GenerateError,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResp {
    status: PredictionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    output: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    raw_output: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingResp {
    id: String,
    status: PredictionStatus,
    poll_url: String,
}

pub(crate) fn poll_url(id: &str) -> String {
    format!("/api/predictions/{}", id)
}

#[handler]
pub async fn generate(req: &Request, body: Body, Data(state): Data<&Arc<AppState>>) -> Response {
    match *req.method() {
        Method::OPTIONS => return Response::builder().status(StatusCode::OK).finish(),
        Method::POST => {}
        _ => return GenerateError::MethodNotAllowed.into_response(),
    }
    let deadline = Instant::now() + state.config.sync_budget;

    if let Err(e) = state.generator.check_credentials() {
        error!("{}", e);
        return e.into_response();
    }

    let text = match read_body(body, state.config.max_body_bytes).await {
        Ok(text) => text,
        Err(e) => return e.into_response(),
    };

    match GenerateParams::from_json(&text) {
        Ok(params) => run(state, params, deadline).await,
        Err(e) => e.into_response(),
    }
}

async fn read_body(body: Body, limit: usize) -> Result<String, GenerateError> {
    let bytes = body.into_bytes_limit(limit).await.map_err(|e| match e {
        ReadBodyError::PayloadTooLarge => GenerateError::PayloadTooLarge,
        _ => GenerateError::InvalidJson,
    })?;

    String::from_utf8(bytes.to_vec()).map_err(|_| GenerateError::InvalidJson)
}

/// Shared tail of `/api/generate` and `/api/upload`. `deadline` bounds how
/// long the backend is waited on before answering 202.
pub(crate) async fn run(state: &AppState, params: GenerateParams, deadline: Instant) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("generate", %request_id, backend = state.generator.name());

    async move {
        let content = match prepare_content(state, params.source) {
            Ok(content) => content,
            Err(e) => return e.into_response(),
        };

        let preset = StylePreset::van_gogh().with_prompt(params.prompt.as_deref());
        let policy = &state.config.poll;

        match state
            .generator
            .generate(&content, &preset, policy, deadline)
            .await
        {
            Ok(Generation::Done {
                id,
                output_url,
                raw_output,
            }) => Json(GenerateResp {
                status: PredictionStatus::Succeeded,
                id,
                output: output_url,
                raw_output,
            })
            .into_response(),
            Ok(Generation::Pending(prediction)) => {
                info!(id = %prediction.id, "answering 202, client should poll");
                Json(PendingResp {
                    poll_url: poll_url(&prediction.id),
                    id: prediction.id,
                    status: prediction.status,
                })
                .with_status(StatusCode::ACCEPTED)
                .into_response()
            }
            Err(e) => {
                error!("generation failed: {}", e);
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// Turns the request's image into what the backend is sent: remote URLs
/// as-is, inline and uploaded images bounded and re-encoded when enabled.
fn prepare_content(state: &AppState, source: ImageSource) -> Result<String, GenerateError> {
    let config = &state.config;

    match source {
        ImageSource::Remote(url) => Ok(url),
        ImageSource::Inline(data_url) if config.compress_uploads => {
            let (_, bytes) = parse_data_url(&data_url)?;
            compress(&bytes, config.compress_max_side)
        }
        ImageSource::Inline(data_url) => Ok(data_url),
        ImageSource::Upload(bytes) if config.compress_uploads => {
            compress(&bytes, config.compress_max_side)
        }
        ImageSource::Upload(bytes) => {
            let format = image::guess_format(&bytes).map_err(|_| GenerateError::InvalidImage)?;
            Ok(to_data_url(format.to_mime_type(), &bytes))
        }
    }
}
