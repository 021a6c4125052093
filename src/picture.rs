// src/picture.rs
use crate::errors::{RegionEditError, Result};
use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgba, RgbaImage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

/// Largest edge accepted when decoding external bytes.
pub const MAX_DIMENSION: u32 = 8192;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Immutable, cheaply clonable RGBA bitmap.
///
/// Clones share pixel storage, so history snapshots and region results can
/// hold the same bitmap without copying it. Serialises as a PNG data URL.
#[derive(Clone)]
pub struct Picture(Arc<RgbaImage>);

impl Picture {
    pub fn new(image: RgbaImage) -> Self {
        Self(Arc::new(image))
    }

    /// Solid canvas. Zero-sized canvases are rejected rather than produced.
    pub fn blank(width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        ensure_canvas(width, height)?;
        Ok(Self::new(RgbaImage::from_pixel(width, height, color)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data).map_err(|e| {
            RegionEditError::ImageProcessing(format!("Invalid image format: {}", e))
        })?;

        let (width, height) = img.dimensions();
        ensure_canvas(width, height)?;
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(RegionEditError::ImageProcessing(format!(
                "Image dimensions exceed {}x{}",
                MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(Self::new(img.to_rgba8()))
    }

    /// Accepts `data:image/...;base64,` URLs as well as bare base64 payloads.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let payload = match url.split_once(";base64,") {
            Some((head, body)) if head.starts_with("data:") => body,
            _ => url,
        };
        let bytes = general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| RegionEditError::ImageProcessing(format!("Invalid base64 image: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        DynamicImage::ImageRgba8(self.0.as_ref().clone())
            .write_to(&mut Cursor::new(&mut output), ImageOutputFormat::Png)
            .map_err(|e| {
                RegionEditError::ImageProcessing(format!("Failed to encode image: {}", e))
            })?;
        Ok(output)
    }

    pub fn to_data_url(&self) -> Result<String> {
        let png = self.to_png_bytes()?;
        Ok(format!(
            "{}{}",
            PNG_DATA_URL_PREFIX,
            general_purpose::STANDARD.encode(png)
        ))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.0
    }

    pub fn into_image(self) -> RgbaImage {
        Arc::try_unwrap(self.0).unwrap_or_else(|shared| shared.as_ref().clone())
    }

    pub fn resized(&self, width: u32, height: u32) -> Result<Self> {
        ensure_canvas(width, height)?;
        if self.dimensions() == (width, height) {
            return Ok(self.clone());
        }
        Ok(Self::new(image::imageops::resize(
            self.as_image(),
            width,
            height,
            image::imageops::FilterType::Triangle,
        )))
    }

    /// Downscale so the longest edge is at most `max_size`, keeping aspect ratio.
    pub fn fit_within(&self, max_size: u32) -> Result<Self> {
        let (width, height) = self.dimensions();
        if width <= max_size && height <= max_size {
            return Ok(self.clone());
        }

        let ratio = (max_size as f32 / width.max(height) as f32).min(1.0);
        let new_width = ((width as f32 * ratio) as u32).max(1);
        let new_height = ((height as f32 * ratio) as u32).max(1);
        self.resized(new_width, new_height)
    }
}

pub(crate) fn ensure_canvas(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(RegionEditError::EmptyCanvas { width, height });
    }
    Ok(())
}

impl From<RgbaImage> for Picture {
    fn from(image: RgbaImage) -> Self {
        Self::new(image)
    }
}

impl PartialEq for Picture {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.dimensions() == other.dimensions() && self.0.as_raw() == other.0.as_raw())
    }
}

impl fmt::Debug for Picture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Picture({}x{})", self.width(), self.height())
    }
}

impl Serialize for Picture {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let url = self.to_data_url().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&url)
    }
}

impl<'de> Deserialize<'de> for Picture {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        Picture::from_data_url(&url).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> Picture {
        Picture::new(RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        }))
    }

    #[test]
    fn data_url_round_trip_is_lossless() {
        let pic = checker(7, 5);
        let url = pic.to_data_url().unwrap();
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        assert_eq!(Picture::from_data_url(&url).unwrap(), pic);
    }

    #[test]
    fn blank_rejects_zero_size() {
        let err = Picture::blank(0, 10, Rgba([0, 0, 0, 0])).unwrap_err();
        assert!(matches!(err, RegionEditError::EmptyCanvas { width: 0, height: 10 }));
    }

    #[test]
    fn garbage_bytes_are_an_image_error() {
        let err = Picture::from_bytes(b"not a png").unwrap_err();
        assert!(matches!(err, RegionEditError::ImageProcessing(_)));
    }

    #[test]
    fn fit_within_keeps_aspect() {
        let pic = checker(400, 200).fit_within(100).unwrap();
        assert_eq!(pic.dimensions(), (100, 50));
        let same = checker(40, 20);
        assert_eq!(same.fit_within(100).unwrap(), same);
    }

    #[test]
    fn serde_uses_data_url_string() {
        let pic = checker(3, 3);
        let json = serde_json::to_string(&pic).unwrap();
        assert!(json.starts_with("\"data:image/png;base64,"));
        let back: Picture = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pic);
    }
}
