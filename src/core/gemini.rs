use std::time::Duration;

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{header::CONTENT_TYPE, Client};
use serde_json::{json, Value};
use tracing::{error, info};

use super::{
    data_url::{is_data_url, parse_data_url, DEFAULT_MIME},
    replicate::build_http_client,
    style::StylePreset,
    Generation,
};
use crate::{config::GeminiConfig, error::GenerateError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

/// First inline image among the first candidate's parts, as a Data URL.
/// Accepts both the camelCase and snake_case spellings of the part.
pub fn extract_inline_image(resp: &Value) -> Option<String> {
    let parts = resp
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)?;

    parts.iter().find_map(|part| {
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
        let data = inline.get("data").and_then(Value::as_str)?;
        if data.is_empty() {
            return None;
        }
        let mime = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        Some(format!("data:{};base64,{}", mime, data))
    })
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        Ok(GeminiClient {
            client: build_http_client()?,
            config,
        })
    }

    pub fn has_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Resolves `content` into `(mime, base64)` for an inline part,
    /// downloading remote URLs first.
    async fn inline_payload(&self, content: &str) -> Result<(String, String), GenerateError> {
        if is_data_url(content) {
            let (mime, bytes) = parse_data_url(content)?;
            return Ok((mime, general_purpose::STANDARD.encode(bytes)));
        }

        let resp = self
            .client
            .get(content)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GenerateError::Upstream {
                status: resp.status().as_u16(),
                message: format!("could not download imageUrl: {}", resp.status()),
                payload: Value::Null,
            });
        }

        let mime = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or(DEFAULT_MIME)
            .to_string();
        let bytes = resp.bytes().await?;

        Ok((mime, general_purpose::STANDARD.encode(&bytes)))
    }

    pub async fn generate(
        &self,
        content: &str,
        preset: &StylePreset,
    ) -> Result<Generation, GenerateError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerateError::MissingCredential("GEMINI_API_KEY"))?;

        let (mime, data) = self.inline_payload(content).await?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_base, self.config.model
        );

        let payload = json!({
            "contents": [{
                "parts": [
                    {
                        "inlineData": {
                            "data": data,
                            "mimeType": mime
                        }
                    },
                    {
                        "text": preset.instruction
                    }
                ]
            }]
        });

        info!(model = %self.config.model, "sending generateContent request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let result: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            let message = result
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("Gemini API error")
                .to_string();
            error!("gemini status: {}, message: {}", status, message);
            return Err(GenerateError::Upstream {
                status: status.as_u16(),
                message,
                payload: result,
            });
        }

        let output_url = extract_inline_image(&result)
            .ok_or_else(|| GenerateError::Malformed("Failed to generate art piece".to_string()))?;

        Ok(Generation::Done {
            id: None,
            output_url,
            raw_output: Value::Null,
        })
    }
}
