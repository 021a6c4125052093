// src/services/mod.rs
//! External collaborators: the generative edit service, the region detector
//! and OCR. The core depends only on the traits here.

pub mod detection;
pub mod edit_client;
pub mod ocr;
pub mod parsers;
pub mod retry;

pub use detection::{Detection, DetectionParams, HttpDetectionClient, detections_to_regions};
pub use edit_client::HttpEditClient;
pub use ocr::ChatOcrClient;
pub use parsers::{ChatImageParser, EditResponseParser, GeminiParser, OpenAiImagesParser, ParsedImage};
pub use retry::RetryingEditService;

use crate::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One request to the generative edit service.
#[derive(Debug, Clone)]
pub struct EditRequest {
    /// PNG-encoded input.
    pub image: Bytes,
    pub prompt: String,
    /// Overrides the client's configured model when set.
    pub model: Option<String>,
}

#[async_trait]
pub trait EditService: Send + Sync {
    /// Returns the edited image's encoded bytes.
    async fn edit(&self, request: &EditRequest, cancel: &CancellationToken) -> Result<Bytes>;

    /// Checked once before a run admits any work.
    fn ensure_configured(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DetectionService: Send + Sync {
    async fn detect(&self, image: &[u8], params: &DetectionParams) -> Result<Vec<Detection>>;
}

#[async_trait]
pub trait OcrService: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

#[async_trait]
impl<S: EditService + ?Sized> EditService for Arc<S> {
    async fn edit(&self, request: &EditRequest, cancel: &CancellationToken) -> Result<Bytes> {
        (**self).edit(request, cancel).await
    }

    fn ensure_configured(&self) -> Result<()> {
        (**self).ensure_configured()
    }
}
