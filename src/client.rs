//! Client side of the relay: submits a photo to `/api/generate`, follows the
//! poll URL when the relay defers, and fetches the finished painting.

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::info;
use url::Url;

use crate::{
    core::{
        data_url::{is_data_url, parse_data_url},
        prediction::{poll_until, PollPolicy, Prediction},
    },
    error::GenerateError,
};

/// Screen the user is on, in the order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Processing,
    Result,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Upload => "upload",
            Stage::Processing => "processing",
            Stage::Result => "result",
        };
        f.write_str(name)
    }
}

const MIN_POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RelayClient {
    client: Client,
    base: Url,
    policy: PollPolicy,
}

fn relay_message(body: &Value, status: StatusCode) -> String {
    body.get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("relay answered {}", status))
}

async fn read_body(resp: reqwest::Response) -> Result<(StatusCode, Value), GenerateError> {
    let status = resp.status();
    let text = resp.text().await?;
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok((status, body))
}

impl RelayClient {
    pub fn new(server: &str, policy: PollPolicy) -> Result<Self> {
        let mut base =
            Url::parse(server).with_context(|| format!("invalid server url `{server}`"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::ClientBuilder::new()
            .no_proxy()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(RelayClient {
            client,
            base,
            policy,
        })
    }

    /// Resolves `path` under the server URL, keeping any prefix it has.
    fn endpoint(&self, path: &str) -> Result<Url, GenerateError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| GenerateError::Internal(format!("bad relay path `{path}`: {e}")))
    }

    /// Sends `image` (a Data URL or http URL) and returns the output URL,
    /// polling the relay if it answers 202. The whole exchange is bounded by
    /// the policy's `max_wait`.
    pub async fn submit(&self, image: &str, prompt: Option<&str>) -> Result<String, GenerateError> {
        let deadline = Instant::now() + self.policy.max_wait;
        let mut body = if is_data_url(image) {
            json!({ "image": image })
        } else {
            json!({ "imageUrl": image })
        };
        if let Some(prompt) = prompt {
            body["prompt"] = json!(prompt);
        }

        info!(stage = %Stage::Processing, "submitting photo");
        let resp = self
            .client
            .post(self.endpoint("/api/generate")?)
            .timeout(self.policy.max_wait)
            .json(&body)
            .send()
            .await?;
        let (status, body) = read_body(resp).await?;

        match status {
            StatusCode::OK => body
                .get("output")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| GenerateError::Malformed("relay returned no output".to_string())),
            StatusCode::ACCEPTED => {
                let pending: Prediction = serde_json::from_value(body.clone())
                    .map_err(|e| GenerateError::Malformed(format!("bad 202 body: {e}")))?;
                let poll_path = body
                    .get("pollUrl")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("/api/predictions/{}", pending.id));

                info!(id = %pending.id, "relay deferred, polling {}", poll_path);
                let done = poll_until(pending, &self.policy, deadline, |_| {
                    self.fetch_status(&poll_path, deadline)
                })
                .await?;

                done.output_url()
                    .ok_or_else(|| GenerateError::Malformed("relay returned no output".to_string()))
            }
            _ => Err(GenerateError::Upstream {
                status: status.as_u16(),
                message: relay_message(&body, status),
                payload: body,
            }),
        }
    }

    async fn fetch_status(&self, path: &str, deadline: Instant) -> Result<Prediction, GenerateError> {
        let left = deadline.saturating_duration_since(Instant::now());
        let resp = self
            .client
            .get(self.endpoint(path)?)
            .timeout(left.max(MIN_POLL_TIMEOUT))
            .send()
            .await?;
        let (status, body) = read_body(resp).await?;

        let prediction = serde_json::from_value::<Prediction>(body.clone()).ok();
        match prediction {
            Some(p) if status.is_success() || p.status.is_terminal() => Ok(p),
            _ => Err(GenerateError::Upstream {
                status: status.as_u16(),
                message: relay_message(&body, status),
                payload: body,
            }),
        }
    }

    /// Bytes of the finished image, decoding Data URLs locally.
    pub async fn download(&self, output: &str) -> Result<Vec<u8>, GenerateError> {
        if is_data_url(output) {
            let (_, bytes) = parse_data_url(output)?;
            return Ok(bytes);
        }

        let resp = self.client.get(output).send().await?;
        if !resp.status().is_success() {
            return Err(GenerateError::Upstream {
                status: resp.status().as_u16(),
                message: format!("could not download result: {}", resp.status()),
                payload: Value::Null,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }
}
