use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::Result;
use reqwest::{header::HeaderMap, Client, Method};
use serde::Serialize;
use serde_json::Value;
use tokio::time;
use tracing::{error, info};

use super::{
    prediction::{is_valid_prediction_id, poll_until, PollPolicy, Prediction},
    style::StylePreset,
    Generation,
};
use crate::{config::ReplicateConfig, error::GenerateError};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
const VERSION_TTL: Duration = Duration::from_secs(6 * 3600);
const MAX_PREFER_WAIT_SECS: u64 = 60;
const MAX_CREATE_TIMEOUT: Duration = Duration::from_secs(65);
/// Headroom between `Prefer: wait` and the create request's own timeout.
const CREATE_GRACE: Duration = Duration::from_secs(5);
const POLL_GRACE: Duration = Duration::from_secs(2);

struct CachedVersion {
    key: String,
    version_id: String,
    fetched_at: Instant,
}

/// Client for the Replicate predictions API.
///
/// ```text
/// curl -s -X POST \
///   -H "Authorization: Bearer $REPLICATE_API_TOKEN" \
///   -H "Content-Type: application/json" \
///   -H "Prefer: wait=60" \
///   -d '{"version": "...", "input": {"image": "data:image/jpeg;base64,...", "prompt": "..."}}' \
///   https://api.replicate.com/v1/predictions
/// ```
pub struct ReplicateClient {
    client: Client,
    config: ReplicateConfig,
    latest_version: Mutex<Option<CachedVersion>>,
}

#[derive(Serialize, Debug)]
struct CreatePrediction<'a> {
    version: &'a str,
    input: Value,
}

pub(crate) fn build_http_client() -> Result<Client> {
    let c = reqwest::ClientBuilder::new()
        .no_proxy()
        .connect_timeout(Duration::from_secs(5));

    Ok(c.build()?)
}

fn get_headers(token: &str, prefer_wait: Option<u32>) -> Result<HeaderMap, GenerateError> {
    let mut headers = HashMap::with_capacity(3);
    headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    headers.insert("content-type".to_string(), "application/json".to_string());
    if let Some(secs) = prefer_wait {
        headers.insert("Prefer".to_string(), format!("wait={}", secs));
    }

    (&headers)
        .try_into()
        .map_err(|_| GenerateError::Internal("REPLICATE_API_TOKEN is not a valid header".into()))
}

/// `Prefer: wait` seconds and request timeout for a create issued with
/// `remaining` budget. The wait always ends before the timeout fires, so a
/// slow model comes back as a running prediction instead of a dropped call.
fn create_window(remaining: Duration) -> (Option<u32>, Duration) {
    let wait = remaining
        .saturating_sub(CREATE_GRACE)
        .as_secs()
        .min(MAX_PREFER_WAIT_SECS) as u32;
    let timeout = remaining.max(CREATE_GRACE).min(MAX_CREATE_TIMEOUT);

    ((wait > 0).then_some(wait), timeout)
}

fn lookup_timeout(deadline: time::Instant) -> Duration {
    (deadline.saturating_duration_since(time::Instant::now()) + POLL_GRACE).min(LOOKUP_TIMEOUT)
}

/// Message for a failed call: `detail`, then `error`, then the raw body.
pub(crate) fn upstream_message(data: &Value) -> String {
    data.get("detail")
        .and_then(Value::as_str)
        .or_else(|| data.get("error").and_then(Value::as_str))
        .or_else(|| data.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Replicate API error")
        .to_string()
}

impl ReplicateClient {
    pub fn new(config: ReplicateConfig) -> Result<Self> {
        Ok(ReplicateClient {
            client: build_http_client()?,
            config,
            latest_version: Mutex::new(None),
        })
    }

    pub fn has_token(&self) -> bool {
        self.config.api_token.is_some()
    }

    fn token(&self) -> Result<&str, GenerateError> {
        self.config
            .api_token
            .as_deref()
            .ok_or(GenerateError::MissingCredential("REPLICATE_API_TOKEN"))
    }

    async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
        prefer_wait: Option<u32>,
    ) -> Result<Value, GenerateError> {
        let token = self.token()?;
        let url = format!("{}{}", self.config.api_base, path);

        let mut r = self
            .client
            .request(method, &url)
            .headers(get_headers(token, prefer_wait)?)
            .timeout(timeout);
        if let Some(body) = body {
            r = r.body(body.to_string());
        }

        let r = r.send().await?;
        let status = r.status();
        let text = r.text().await?;

        let data = if text.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(v) => v,
                Err(_) => Value::String(text),
            }
        };

        if !status.is_success() {
            let message = upstream_message(&data);
            error!("replicate status: {} on {}", status, path);
            error!("replicate response: {}", data);
            return Err(GenerateError::Upstream {
                status: status.as_u16(),
                message,
                payload: data,
            });
        }

        Ok(data)
    }

    /// Version id of `owner/name`, from the pinned config, the cache, or the
    /// models endpoint in that order.
    pub async fn latest_version(&self) -> Result<String, GenerateError> {
        self.resolve_version(LOOKUP_TIMEOUT).await
    }

    async fn resolve_version(&self, timeout: Duration) -> Result<String, GenerateError> {
        if let Some(version) = &self.config.model_version {
            return Ok(version.clone());
        }

        let key = format!("{}/{}", self.config.model_owner, self.config.model_name);

        if let Some(cached) = self.cached_version(&key) {
            return Ok(cached);
        }

        let model = self
            .fetch(
                Method::GET,
                &format!("/models/{}", key),
                None,
                timeout,
                None,
            )
            .await?;

        let version_id = model
            .pointer("/latest_version/id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GenerateError::Malformed(format!(
                    "Could not resolve latest_version.id for {}",
                    key
                ))
            })?
            .to_string();

        info!(model = %key, version = %version_id, "resolved model version");

        let mut slot = self
            .latest_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(CachedVersion {
            key,
            version_id: version_id.clone(),
            fetched_at: Instant::now(),
        });

        Ok(version_id)
    }

    fn cached_version(&self, key: &str) -> Option<String> {
        let slot = self
            .latest_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        slot.as_ref()
            .filter(|c| c.key == key && c.fetched_at.elapsed() < VERSION_TTL)
            .map(|c| c.version_id.clone())
    }

    /// Creates a prediction, letting Replicate hold the request for as much
    /// of `remaining` as fits.
    pub async fn create_prediction(
        &self,
        version: &str,
        input: Value,
        remaining: Duration,
    ) -> Result<Prediction, GenerateError> {
        let body = serde_json::to_value(CreatePrediction { version, input })
            .map_err(|e| GenerateError::Internal(e.to_string()))?;
        let (prefer_wait, timeout) = create_window(remaining);

        let data = self
            .fetch(Method::POST, "/predictions", Some(body), timeout, prefer_wait)
            .await?;

        parse_prediction(data)
    }

    pub async fn get_prediction(&self, id: &str) -> Result<Prediction, GenerateError> {
        self.fetch_prediction(id, LOOKUP_TIMEOUT).await
    }

    async fn fetch_prediction(&self, id: &str, timeout: Duration) -> Result<Prediction, GenerateError> {
        if !is_valid_prediction_id(id) {
            return Err(GenerateError::InvalidPredictionId);
        }

        let data = self
            .fetch(Method::GET, &format!("/predictions/{}", id), None, timeout, None)
            .await?;

        parse_prediction(data)
    }

    /// Creates a prediction for `content` and waits on it until `deadline`.
    /// An unsettled prediction is handed back as pending.
    pub async fn generate(
        &self,
        content: &str,
        preset: &StylePreset,
        policy: &PollPolicy,
        deadline: time::Instant,
    ) -> Result<Generation, GenerateError> {
        let version = self.resolve_version(lookup_timeout(deadline)).await?;
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        let created = self
            .create_prediction(&version, preset.replicate_input(content), remaining)
            .await?;

        info!(id = %created.id, status = ?created.status, "prediction created");

        let settled = poll_until(created, policy, deadline, |id| async move {
            self.fetch_prediction(&id, lookup_timeout(deadline)).await
        })
        .await;

        match settled {
            Ok(done) => {
                let output_url = done.output_url().ok_or_else(|| {
                    GenerateError::Malformed("Prediction succeeded without an output URL".into())
                })?;
                info!(id = %done.id, "prediction succeeded");

                Ok(Generation::Done {
                    id: Some(done.id),
                    output_url,
                    raw_output: done.output.unwrap_or(Value::Null),
                })
            }
            Err(GenerateError::Timeout { prediction }) => {
                info!(id = %prediction.id, status = ?prediction.status, "prediction still running, deferring");
                Ok(Generation::Pending(*prediction))
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_prediction(data: Value) -> Result<Prediction, GenerateError> {
    serde_json::from_value::<Prediction>(data.clone()).map_err(|e| GenerateError::Upstream {
        status: 502,
        message: format!("unexpected prediction payload: {e}"),
        payload: data,
    })
}
