use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};

use crate::core::{compress::DEFAULT_MAX_SIDE, prediction::PollPolicy};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
pub const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_REPLICATE_MODEL: &str = "jagilley/controlnet-depth-sdxl";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Replicate,
    Gemini,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replicate" => Ok(Backend::Replicate),
            "gemini" => Ok(Backend::Gemini),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: Option<String>,
    pub api_base: String,
    pub model_owner: String,
    pub model_name: String,
    pub model_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub backend: Backend,
    pub replicate: ReplicateConfig,
    pub gemini: GeminiConfig,
    /// How long `/api/generate` waits before answering 202 with a poll URL.
    pub sync_budget: Duration,
    pub poll: PollPolicy,
    pub compress_uploads: bool,
    pub compress_max_side: u32,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        let (model_owner, model_name) = split_model(DEFAULT_REPLICATE_MODEL)
            .unwrap_or_else(|_| ("jagilley".to_string(), "controlnet-depth-sdxl".to_string()));

        Config {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            backend: Backend::Replicate,
            replicate: ReplicateConfig {
                api_token: None,
                api_base: REPLICATE_API_BASE.to_string(),
                model_owner,
                model_name,
                model_version: None,
            },
            gemini: GeminiConfig {
                api_key: None,
                api_base: GEMINI_API_BASE.to_string(),
                model: DEFAULT_GEMINI_MODEL.to_string(),
            },
            sync_budget: Duration::from_secs(50),
            poll: PollPolicy::default(),
            compress_uploads: true,
            compress_max_side: DEFAULT_MAX_SIDE,
            max_body_bytes: 15 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.backend = parse(&get, "GENERATION_BACKEND", config.backend)?;

        config.replicate.api_token = get("REPLICATE_API_TOKEN");
        if let Some(base) = get("REPLICATE_API_BASE") {
            config.replicate.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("REPLICATE_MODEL") {
            let (owner, name) = split_model(&model)?;
            config.replicate.model_owner = owner;
            config.replicate.model_name = name;
        }
        config.replicate.model_version = get("REPLICATE_MODEL_VERSION");

        config.gemini.api_key = get("GEMINI_API_KEY").or_else(|| get("API_KEY"));
        if let Some(base) = get("GEMINI_API_BASE") {
            config.gemini.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("GEMINI_MODEL") {
            config.gemini.model = model;
        }

        let budget = parse(&get, "SYNC_BUDGET_SECS", config.sync_budget.as_secs())?;
        config.sync_budget = Duration::from_secs(budget);
        config.compress_uploads = parse_flag(&get, "COMPRESS_UPLOADS", config.compress_uploads)?;
        config.compress_max_side = parse(&get, "COMPRESS_MAX_SIDE", config.compress_max_side)?;
        config.max_body_bytes = parse(&get, "MAX_BODY_BYTES", config.max_body_bytes)?;

        Ok(config)
    }
}

fn split_model(model: &str) -> Result<(String, String)> {
    match model.trim().split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(anyhow!(
            "REPLICATE_MODEL must look like `owner/name`, got `{model}`"
        )),
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {key}=`{raw}`: {e}")),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid {key}=`{v}`: expected a boolean")),
        },
    }
}
