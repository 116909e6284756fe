use poem::web::Multipart;
use serde_json::Value;
use url::Url;

use crate::{
    core::data_url::{is_data_url, normalize_to_data_url, DEFAULT_MIME},
    error::GenerateError,
};

/// Where the photo comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// http(s) URL the vendor fetches itself.
    Remote(String),
    /// Data URL sent in a JSON body.
    Inline(String),
    /// Raw bytes from a multipart upload.
    Upload(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateParams {
    pub source: ImageSource,
    pub prompt: Option<String>,
}

fn text_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl GenerateParams {
    /// Parses `{ image | imageBase64 | imageUrl, mimeType?, prompt? }`.
    /// An empty body counts as `{}`.
    pub fn from_json(body: &str) -> Result<GenerateParams, GenerateError> {
        let body: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body).map_err(|_| GenerateError::InvalidJson)?
        };

        let prompt = text_field(&body, "prompt").map(str::to_string);

        if let Some(image_url) = text_field(&body, "imageUrl") {
            if is_data_url(image_url) {
                return Ok(GenerateParams {
                    source: ImageSource::Inline(image_url.to_string()),
                    prompt,
                });
            }

            let parsed = Url::parse(image_url).map_err(|_| GenerateError::InvalidImageUrl)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(GenerateError::InvalidImageUrl);
            }

            return Ok(GenerateParams {
                source: ImageSource::Remote(parsed.to_string()),
                prompt,
            });
        }

        let mime = text_field(&body, "mimeType").unwrap_or(DEFAULT_MIME);
        let payload = text_field(&body, "imageBase64").or_else(|| text_field(&body, "image"));

        let content = normalize_to_data_url(payload, mime).ok_or(GenerateError::NoImage)?;

        Ok(GenerateParams {
            source: ImageSource::Inline(content),
            prompt,
        })
    }

    /// Reads the first `image` (or `blob`) file field and an optional
    /// `prompt` text field. Fields larger than `limit` bytes are rejected.
    pub async fn from_multipart(
        mut multipart: Multipart,
        limit: usize,
    ) -> Result<GenerateParams, GenerateError> {
        let mut blob: Option<Vec<u8>> = None;
        let mut prompt = None;

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => return Err(GenerateError::InvalidMultipart(e.to_string())),
            };
            let name = match field.name() {
                Some(name) => name.to_string(),
                None => continue,
            };

            match name.as_str() {
                "image" | "blob" if blob.is_none() => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| GenerateError::InvalidMultipart(e.to_string()))?;
                    if bytes.len() > limit {
                        return Err(GenerateError::PayloadTooLarge);
                    }
                    if !bytes.is_empty() {
                        blob = Some(bytes);
                    }
                }
                "prompt" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| GenerateError::InvalidMultipart(e.to_string()))?;
                    let text = text.trim();
                    if !text.is_empty() {
                        prompt = Some(text.to_string());
                    }
                }
                _ => continue,
            }
        }

        let blob = blob.ok_or(GenerateError::NoImage)?;

        Ok(GenerateParams {
            source: ImageSource::Upload(blob),
            prompt,
        })
    }
}
