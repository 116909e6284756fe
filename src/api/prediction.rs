use std::sync::Arc;

use poem::{
    handler,
    http::StatusCode,
    web::{Data, Json, Path},
    IntoResponse, Response,
};
use serde::Serialize;
use serde_json::Value;

use super::{generate::poll_url, AppState};
use crate::{
    core::prediction::{is_valid_prediction_id, Prediction, PredictionStatus},
    error::GenerateError,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionResp {
    id: String,
    status: PredictionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    poll_url: Option<String>,
}

/// Current state of a deferred prediction. Never waits.
#[handler]
pub async fn prediction(Path(id): Path<String>, Data(state): Data<&Arc<AppState>>) -> Response {
    if !is_valid_prediction_id(&id) {
        return GenerateError::InvalidPredictionId.into_response();
    }

    match state.generator.prediction(&id).await {
        Ok(p) if p.id.is_empty() => {
            GenerateError::Malformed("Prediction missing".to_string()).into_response()
        }
        Ok(p) => status_response(p),
        Err(e) => e.into_response(),
    }
}

fn status_response(p: Prediction) -> Response {
    let mut resp = PredictionResp {
        id: p.id.clone(),
        status: p.status,
        output: None,
        raw_output: None,
        error: None,
        poll_url: None,
    };

    let status = match p.status {
        PredictionStatus::Succeeded => match p.output_url() {
            Some(url) => {
                resp.output = Some(url);
                resp.raw_output = p.output;
                StatusCode::OK
            }
            None => {
                return GenerateError::Malformed(
                    "Prediction succeeded without an output URL".to_string(),
                )
                .into_response()
            }
        },
        PredictionStatus::Failed | PredictionStatus::Canceled => {
            resp.error = Some(
                p.error_message()
                    .unwrap_or_else(|| "Prediction failed".to_string()),
            );
            StatusCode::BAD_GATEWAY
        }
        _ => {
            resp.poll_url = Some(poll_url(&p.id));
            StatusCode::ACCEPTED
        }
    };

    Json(resp).with_status(status).into_response()
}
