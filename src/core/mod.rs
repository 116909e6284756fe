use anyhow::Result;
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    config::{Backend, Config},
    error::GenerateError,
};

pub mod compress;
pub mod data_url;
pub mod gemini;
pub mod prediction;
pub mod replicate;
pub mod style;

use gemini::GeminiClient;
use prediction::{PollPolicy, Prediction};
use replicate::ReplicateClient;
use style::StylePreset;

pub static SUPPORT_IMAGE_FORMATS: [image::ImageFormat; 3] = [
    image::ImageFormat::Png,
    image::ImageFormat::Jpeg,
    image::ImageFormat::WebP,
];

#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Done {
        id: Option<String>,
        output_url: String,
        raw_output: Value,
    },
    /// The wait budget ran out; the prediction keeps running remotely.
    Pending(Prediction),
}

pub enum Generator {
    Replicate(ReplicateClient),
    Gemini(GeminiClient),
}

impl Generator {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(match config.backend {
            Backend::Replicate => Generator::Replicate(ReplicateClient::new(config.replicate.clone())?),
            Backend::Gemini => Generator::Gemini(GeminiClient::new(config.gemini.clone())?),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Generator::Replicate(_) => "replicate",
            Generator::Gemini(_) => "gemini",
        }
    }

    /// Fails fast when the backend has no credential, before the upload is
    /// decoded.
    pub fn check_credentials(&self) -> Result<(), GenerateError> {
        match self {
            Generator::Replicate(c) if !c.has_token() => {
                Err(GenerateError::MissingCredential("REPLICATE_API_TOKEN"))
            }
            Generator::Gemini(c) if !c.has_key() => {
                Err(GenerateError::MissingCredential("GEMINI_API_KEY"))
            }
            _ => Ok(()),
        }
    }

    /// Runs one generation. Replicate stops waiting at `deadline` and hands
    /// back the still-running prediction; Gemini always answers in one call.
    pub async fn generate(
        &self,
        content: &str,
        preset: &StylePreset,
        policy: &PollPolicy,
        deadline: Instant,
    ) -> Result<Generation, GenerateError> {
        match self {
            Generator::Replicate(c) => c.generate(content, preset, policy, deadline).await,
            Generator::Gemini(c) => c.generate(content, preset).await,
        }
    }

    pub async fn prediction(&self, id: &str) -> Result<Prediction, GenerateError> {
        match self {
            Generator::Replicate(c) => c.get_prediction(id).await,
            Generator::Gemini(_) => Err(GenerateError::Unsupported(
                "Polling is not supported by the gemini backend",
            )),
        }
    }
}
