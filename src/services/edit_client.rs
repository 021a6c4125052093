// src/services/edit_client.rs
use crate::config::{Provider, ServiceConfig};
use crate::errors::{RegionEditError, Result};
use crate::services::parsers::{
    ChatImageParser, EditResponseParser, GeminiParser, OpenAiImagesParser, ParsedImage,
};
use crate::services::{EditRequest, EditService};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use log::debug;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// HTTP client for the generative edit endpoint.
///
/// Request shape follows the configured provider; extracting the image from
/// the response is delegated to an [`EditResponseParser`].
pub struct HttpEditClient {
    config: ServiceConfig,
    client: Client,
    parser: Box<dyn EditResponseParser>,
}

impl HttpEditClient {
    pub fn new(config: ServiceConfig) -> Self {
        let parser: Box<dyn EditResponseParser> = match config.provider {
            Provider::OpenAiImages => Box::new(OpenAiImagesParser),
            Provider::Chat => Box::new(ChatImageParser),
            Provider::Gemini => Box::new(GeminiParser),
        };
        Self::with_parser(config, parser)
    }

    pub fn with_parser(config: ServiceConfig, parser: Box<dyn EditResponseParser>) -> Self {
        Self {
            config,
            client: Client::new(),
            parser,
        }
    }

    async fn send(&self, request: &EditRequest) -> Result<Value> {
        let model = request.model.as_deref().unwrap_or(&self.config.model);

        let builder = match self.config.provider {
            Provider::OpenAiImages => {
                let image = Part::bytes(request.image.to_vec())
                    .file_name("image.png")
                    .mime_str("image/png")
                    .map_err(|e| RegionEditError::Service(e.to_string()))?;
                let form = Form::new()
                    .text("model", model.to_string())
                    .text("prompt", request.prompt.clone())
                    .part("image", image);
                self.client
                    .post(&self.config.api_url)
                    .header("Authorization", format!("Bearer {}", self.config.api_key))
                    .multipart(form)
            }
            Provider::Chat => {
                let base64_image = general_purpose::STANDARD.encode(&request.image);
                self.client
                    .post(&self.config.api_url)
                    .header("Authorization", format!("Bearer {}", self.config.api_key))
                    .json(&json!({
                        "model": model,
                        "messages": [{
                            "role": "user",
                            "content": [
                                { "type": "text", "text": request.prompt },
                                {
                                    "type": "image_url",
                                    "image_url": {
                                        "url": format!("data:image/png;base64,{}", base64_image)
                                    }
                                }
                            ]
                        }],
                        "modalities": ["image", "text"]
                    }))
            }
            Provider::Gemini => {
                let base64_image = general_purpose::STANDARD.encode(&request.image);
                self.client
                    .post(format!(
                        "{}/models/{}:generateContent",
                        self.config.api_url.trim_end_matches('/'),
                        model
                    ))
                    .header("x-goog-api-key", &self.config.api_key)
                    .json(&json!({
                        "contents": [{
                            "parts": [
                                { "text": request.prompt },
                                { "inline_data": { "mime_type": "image/png", "data": base64_image } }
                            ]
                        }],
                        "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] }
                    }))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| RegionEditError::Service(format!("Edit request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RegionEditError::Service(format!(
                "Edit service error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RegionEditError::Service(format!("Failed to parse edit response: {}", e)))
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegionEditError::Service(format!("Image download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(RegionEditError::Service(format!(
                "Image download failed ({})",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| RegionEditError::Service(format!("Image download failed: {}", e)))
    }
}

#[async_trait]
impl EditService for HttpEditClient {
    async fn edit(&self, request: &EditRequest, cancel: &CancellationToken) -> Result<Bytes> {
        let start = Instant::now();
        let work = async {
            let raw = self.send(request).await?;
            match self.parser.parse_edit_response(&raw)? {
                ParsedImage::Bytes(data) => Ok(Bytes::from(data)),
                ParsedImage::Url(url) => self.download(&url).await,
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(RegionEditError::Cancelled),
            result = work => result,
        };
        debug!(
            "Edit call finished in {} ms (ok: {})",
            start.elapsed().as_millis(),
            result.is_ok()
        );
        result
    }

    fn ensure_configured(&self) -> Result<()> {
        self.config.validate()
    }
}
