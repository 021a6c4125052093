// src/services/ocr.rs
use crate::config::ServiceConfig;
use crate::errors::{RegionEditError, Result};
use crate::services::OcrService;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde_json::json;

const TRANSCRIBE_PROMPT: &str = "Transcribe every piece of text visible in this image exactly as \
written, preserving line breaks. Reply with the text only. If there is no text, reply with an \
empty message.";

/// OCR through a vision-capable chat completions endpoint.
pub struct ChatOcrClient {
    api_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl ChatOcrClient {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            api_url,
            api_key,
            model,
            client: Client::new(),
        }
    }

    /// Builds a client when an OCR model is configured. The edit service's
    /// key is reused, against the OCR URL if one is set.
    pub fn from_config(config: &ServiceConfig) -> Option<Self> {
        let model = config.ocr_model.clone()?;
        let api_url = config
            .ocr_api_url
            .clone()
            .unwrap_or_else(|| config.api_url.clone());
        Some(Self::new(api_url, config.api_key.clone(), model))
    }
}

#[async_trait]
impl OcrService for ChatOcrClient {
    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let base64_image = general_purpose::STANDARD.encode(image);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": TRANSCRIBE_PROMPT },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:image/png;base64,{}", base64_image)
                            }
                        }
                    ]
                }],
                "max_tokens": 1024
            }))
            .send()
            .await
            .map_err(|e| RegionEditError::Service(format!("OCR request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RegionEditError::Service(format!("OCR error: {}", error_text)));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RegionEditError::Service(format!("Failed to parse OCR response: {}", e)))?;

        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| RegionEditError::Service("No content in OCR response".to_string()))?;

        Ok(content.trim().to_string())
    }
}
