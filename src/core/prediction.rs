use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::GenerateError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    #[default]
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<String>,
}

/// Asynchronous job as reported by the prediction API. Only `status` is
/// relied upon; everything else is passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: PredictionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<PredictionUrls>,
}

impl Prediction {
    pub fn new(id: &str, status: PredictionStatus) -> Self {
        Prediction {
            id: id.to_string(),
            status,
            ..Default::default()
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn output_url(&self) -> Option<String> {
        self.output.as_ref().and_then(first_output_url)
    }
}

/// Picks the image URL out of a model's output. Lists yield their last
/// entry since pipelines emit intermediate frames first.
pub fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.last().and_then(first_output_url),
        Value::Object(map) => ["url", "image", "output", "result"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(first_output_url),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            initial_delay: Duration::from_millis(1000),
            factor: 1.5,
            max_delay: Duration::from_millis(5000),
            max_wait: Duration::from_secs(180),
        }
    }
}

impl PollPolicy {
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn next_delay(&self, delay: Duration) -> Duration {
        let millis = (delay.as_millis() as f64 * self.factor).floor() as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Prediction ids are opaque tokens of `[A-Za-z0-9_-]`; anything else never
/// reaches an upstream URL.
pub fn is_valid_prediction_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Re-fetches `initial` by id until it settles or `policy.max_wait` elapses.
pub async fn poll_until_settled<F, Fut>(
    initial: Prediction,
    policy: &PollPolicy,
    fetch: F,
) -> Result<Prediction, GenerateError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Prediction, GenerateError>>,
{
    poll_until(initial, policy, Instant::now() + policy.max_wait, fetch).await
}

/// Same as [`poll_until_settled`] against an absolute `deadline`. The last
/// pause is cut short at the deadline and no fetch follows it.
pub async fn poll_until<F, Fut>(
    initial: Prediction,
    policy: &PollPolicy,
    deadline: Instant,
    mut fetch: F,
) -> Result<Prediction, GenerateError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Prediction, GenerateError>>,
{
    let mut delay = policy.initial_delay;
    let mut current = initial;

    loop {
        match current.status {
            PredictionStatus::Succeeded => return Ok(current),
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                let message = current
                    .error_message()
                    .unwrap_or_else(|| "Prediction failed".to_string());
                return Err(GenerateError::PredictionFailed {
                    message,
                    prediction: Box::new(current),
                });
            }
            _ => {}
        }

        if current.id.is_empty() {
            return Err(GenerateError::Malformed(
                "Prediction missing".to_string(),
            ));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let pause = delay.min(remaining);
        if !pause.is_zero() {
            sleep(pause).await;
        }
        if pause < delay {
            return Err(GenerateError::Timeout {
                prediction: Box::new(current),
            });
        }
        delay = policy.next_delay(delay);

        debug!(id = %current.id, status = ?current.status, "polling prediction");
        current = fetch(current.id.clone()).await?;
    }
}
