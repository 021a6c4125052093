// src/config.rs
use crate::errors::{RegionEditError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Response shape the edit endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// `{"data": [{"b64_json": ...}]}` image endpoints.
    OpenAiImages,
    /// Chat completions that return the image inside message text.
    Chat,
    /// `candidates[].content.parts[].inlineData` responses.
    Gemini,
}

impl FromStr for Provider {
    type Err = RegionEditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai-images" | "openai" => Ok(Provider::OpenAiImages),
            "chat" => Ok(Provider::Chat),
            "gemini" => Ok(Provider::Gemini),
            other => Err(RegionEditError::Configuration(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// Connection settings for the remote edit service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub provider: Provider,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Vision chat endpoint for OCR; falls back to `api_url`.
    pub ocr_api_url: Option<String>,
    /// OCR stays off unless a model is named.
    pub ocr_model: Option<String>,
}

impl ServiceConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
    pub const DEFAULT_MAX_RETRIES: u32 = 2;

    /// Reads `REGION_EDIT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| RegionEditError::Configuration(format!("{} must be set", key)))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    RegionEditError::Configuration(format!("{} is not a number: {}", key, raw))
                }),
                None => Ok(default),
            }
        };

        let config = Self {
            api_url: required("REGION_EDIT_API_URL")?,
            api_key: required("REGION_EDIT_API_KEY")?,
            model: lookup("REGION_EDIT_MODEL").unwrap_or_else(|| "gpt-image-1".to_string()),
            provider: lookup("REGION_EDIT_PROVIDER")
                .as_deref()
                .unwrap_or("openai-images")
                .parse()?,
            timeout: Duration::from_secs(number(
                "REGION_EDIT_TIMEOUT_SECS",
                Self::DEFAULT_TIMEOUT_SECS,
            )?),
            max_retries: u32::try_from(number(
                "REGION_EDIT_MAX_RETRIES",
                Self::DEFAULT_MAX_RETRIES as u64,
            )?)
            .map_err(|_| {
                RegionEditError::Configuration(
                    "REGION_EDIT_MAX_RETRIES is out of range".to_string(),
                )
            })?,
            retry_backoff: Duration::from_millis(number("REGION_EDIT_RETRY_BACKOFF_MS", 500)?),
            ocr_api_url: optional("REGION_EDIT_OCR_URL"),
            ocr_model: optional("REGION_EDIT_OCR_MODEL"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(RegionEditError::Configuration(
                "API key is not configured".to_string(),
            ));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(RegionEditError::Configuration(format!(
                "Service URL must be http(s): {}",
                self.api_url
            )));
        }
        if let Some(url) = &self.ocr_api_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(RegionEditError::Configuration(format!(
                    "OCR URL must be http(s): {}",
                    url
                )));
            }
        }
        if self.timeout.is_zero() {
            return Err(RegionEditError::Configuration(
                "Timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-run processing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Upper bound on in-flight remote calls across the whole run.
    pub concurrency: usize,
    pub prompt: String,
    /// Synthesise a full-canvas region for images without regions.
    pub process_full_image: bool,
    /// One remote call per image on a masked full image instead of per-region crops.
    pub full_image_masking: bool,
    pub inverted_mask: bool,
    pub square_padding: bool,
    /// Run OCR on the input and append the text to the prompt.
    pub ocr_context: bool,
    pub feather_opaque_percent: f32,
    pub max_upload_side: Option<u32>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            prompt: String::new(),
            process_full_image: true,
            full_image_masking: false,
            inverted_mask: false,
            square_padding: false,
            ocr_context: false,
            feather_opaque_percent: 100.0,
            max_upload_side: None,
        }
    }
}

impl ProcessConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(RegionEditError::Configuration(
                "Concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.feather_opaque_percent) {
            return Err(RegionEditError::Configuration(format!(
                "Feather opacity must be within 0-100, got {}",
                self.feather_opaque_percent
            )));
        }
        if self.max_upload_side == Some(0) {
            return Err(RegionEditError::Configuration(
                "Upload size limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
