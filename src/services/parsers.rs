// src/services/parsers.rs
//! Provider-specific extraction of the edited image from a raw response body.

use crate::errors::{RegionEditError, Result};
use base64::{Engine as _, engine::general_purpose};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedImage {
    Bytes(Vec<u8>),
    /// Remote location the client still has to download.
    Url(String),
}

pub trait EditResponseParser: Send + Sync {
    fn parse_edit_response(&self, raw: &Value) -> Result<ParsedImage>;
}

/// `{"data": [{"b64_json": "..."}]}` or `{"data": [{"url": "..."}]}`.
pub struct OpenAiImagesParser;

impl EditResponseParser for OpenAiImagesParser {
    fn parse_edit_response(&self, raw: &Value) -> Result<ParsedImage> {
        let first = &raw["data"][0];
        if let Some(b64) = first["b64_json"].as_str() {
            return decode_base64(b64).map(ParsedImage::Bytes);
        }
        if let Some(url) = first["url"].as_str() {
            return Ok(ParsedImage::Url(url.to_string()));
        }
        Err(RegionEditError::Service(
            "No image data in response".to_string(),
        ))
    }
}

/// Chat completions that carry the image as a data URL or link, either in
/// structured content parts or embedded in free text.
pub struct ChatImageParser;

impl EditResponseParser for ChatImageParser {
    fn parse_edit_response(&self, raw: &Value) -> Result<ParsedImage> {
        let message = &raw["choices"][0]["message"];

        if let Some(url) = message["images"][0]["image_url"]["url"].as_str() {
            return parse_url(url);
        }

        let content = &message["content"];
        if let Some(parts) = content.as_array() {
            for part in parts {
                if let Some(url) = part["image_url"]["url"].as_str() {
                    return parse_url(url);
                }
                if let Some(text) = part["text"].as_str() {
                    if let Some(found) = find_in_text(text) {
                        return found;
                    }
                }
            }
        }
        if let Some(text) = content.as_str() {
            if let Some(found) = find_in_text(text) {
                return found;
            }
        }

        Err(RegionEditError::Service(
            "No image found in chat response".to_string(),
        ))
    }
}

/// `candidates[0].content.parts[].inlineData.data`.
pub struct GeminiParser;

impl EditResponseParser for GeminiParser {
    fn parse_edit_response(&self, raw: &Value) -> Result<ParsedImage> {
        let parts = raw["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| RegionEditError::Service("No candidates in response".to_string()))?;

        parts
            .iter()
            .find_map(|p| {
                p["inlineData"]["data"]
                    .as_str()
                    .or_else(|| p["inline_data"]["data"].as_str())
            })
            .map(|b64| decode_base64(b64).map(ParsedImage::Bytes))
            .unwrap_or_else(|| {
                Err(RegionEditError::Service(
                    "No inline image in response".to_string(),
                ))
            })
    }
}

fn parse_url(url: &str) -> Result<ParsedImage> {
    match url.split_once(";base64,") {
        Some((head, body)) if head.starts_with("data:") => {
            decode_base64(body).map(ParsedImage::Bytes)
        }
        _ => Ok(ParsedImage::Url(url.to_string())),
    }
}

fn find_in_text(text: &str) -> Option<Result<ParsedImage>> {
    if let Some(start) = text.find("data:image/") {
        let rest = &text[start..];
        let (_, body) = rest.split_once(";base64,")?;
        let end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')))
            .unwrap_or(body.len());
        return Some(decode_base64(&body[..end]).map(ParsedImage::Bytes));
    }

    let start = text.find("https://").or_else(|| text.find("http://"))?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || matches!(c, ')' | '"' | '\'' | '>' | ']'))
        .unwrap_or(rest.len());
    Some(Ok(ParsedImage::Url(rest[..end].to_string())))
}

fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| RegionEditError::Service(format!("Failed to decode image: {}", e)))
}
