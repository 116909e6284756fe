use base64::{engine::general_purpose, Engine as _};

use crate::error::GenerateError;

pub const DEFAULT_MIME: &str = "image/jpeg";

/// Accepts raw base64 or an existing Data URL; blank input yields `None`.
pub fn normalize_to_data_url(payload: Option<&str>, mime: &str) -> Option<String> {
    let payload = payload?.trim();
    if payload.is_empty() {
        return None;
    }

    if payload.starts_with("data:") {
        return Some(payload.to_string());
    }

    Some(format!("data:{};base64,{}", mime, payload))
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        general_purpose::STANDARD.encode(bytes)
    )
}

pub fn is_data_url(s: &str) -> bool {
    s.starts_with("data:")
}

/// Splits `data:<mime>;base64,<payload>` into its mime type and decoded bytes.
pub fn parse_data_url(s: &str) -> Result<(String, Vec<u8>), GenerateError> {
    let rest = s.strip_prefix("data:").ok_or(GenerateError::InvalidImage)?;
    let (meta, payload) = rest.split_once(',').ok_or(GenerateError::InvalidImage)?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or(GenerateError::InvalidImage)?;
    let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };

    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| GenerateError::InvalidImage)?;

    Ok((mime.to_string(), bytes))
}
