use std::sync::Arc;

use poem::{
    handler,
    web::{Data, Multipart},
    IntoResponse, Response,
};
use tokio::time::Instant;
use tracing::error;

use super::{generate::run, params::generate_params::GenerateParams, AppState};
use crate::error::GenerateError;

#[handler]
pub async fn upload(
    multipart: poem::Result<Multipart>,
    Data(state): Data<&Arc<AppState>>,
) -> Response {
    let deadline = Instant::now() + state.config.sync_budget;

    if let Err(e) = state.generator.check_credentials() {
        error!("{}", e);
        return e.into_response();
    }

    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(e) => return GenerateError::InvalidMultipart(e.to_string()).into_response(),
    };

    match GenerateParams::from_multipart(multipart, state.config.max_body_bytes).await {
        Ok(params) => run(state, params, deadline).await,
        Err(e) => e.into_response(),
    }
}
