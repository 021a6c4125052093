// src/services/detection.rs
use crate::errors::{RegionEditError, Result};
use crate::models::{Region, RegionSource};
use crate::services::DetectionService;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One detector hit in absolute pixels of the submitted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f64; 4],
    pub confidence: f32,
}

/// Tuning applied when turning detections into regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectionParams {
    pub confidence_threshold: f32,
    /// Scale factor around the box centre; 1.0 keeps the box as detected.
    pub inflation: f64,
    /// Horizontal shift as a fraction of the box width.
    pub offset_x: f64,
    /// Vertical shift as a fraction of the box height.
    pub offset_y: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            inflation: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

/// Converts pixel boxes to pending percent regions.
///
/// Low-confidence hits are dropped, boxes are inflated around their centre,
/// shifted proportionally to their size and clamped to the image. Boxes that
/// end up with no area are discarded.
pub fn detections_to_regions(
    detections: &[Detection],
    image_width: u32,
    image_height: u32,
    params: &DetectionParams,
) -> Vec<Region> {
    if image_width == 0 || image_height == 0 {
        return Vec::new();
    }
    let (iw, ih) = (image_width as f64, image_height as f64);

    detections
        .iter()
        .filter(|d| d.confidence >= params.confidence_threshold)
        .filter_map(|d| {
            let [ax, ay, bx, by] = d.bbox;
            let (x1, x2) = (ax.min(bx), ax.max(bx));
            let (y1, y2) = (ay.min(by), ay.max(by));
            let (w, h) = (x2 - x1, y2 - y1);
            if !(w > 0.0 && h > 0.0) {
                return None;
            }

            let (nw, nh) = (w * params.inflation, h * params.inflation);
            let cx = (x1 + x2) / 2.0 + nw * params.offset_x;
            let cy = (y1 + y2) / 2.0 + nh * params.offset_y;

            let left = (cx - nw / 2.0).clamp(0.0, iw);
            let right = (cx + nw / 2.0).clamp(0.0, iw);
            let top = (cy - nh / 2.0).clamp(0.0, ih);
            let bottom = (cy + nh / 2.0).clamp(0.0, ih);
            if right - left <= 0.0 || bottom - top <= 0.0 {
                return None;
            }

            Some(Region::new(
                left * 100.0 / iw,
                top * 100.0 / ih,
                (right - left) * 100.0 / iw,
                (bottom - top) * 100.0 / ih,
                RegionSource::Auto,
            ))
        })
        .collect()
}

/// Detector reachable over HTTP: posts the base64 image with the tuning
/// parameters and expects `{"detections": [{"bbox": [...], "confidence": ..}]}`
/// or a bare array.
pub struct HttpDetectionClient {
    api_url: String,
    client: Client,
}

impl HttpDetectionClient {
    pub fn new(api_url: String) -> Self {
        Self {
            api_url,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl DetectionService for HttpDetectionClient {
    async fn detect(&self, image: &[u8], params: &DetectionParams) -> Result<Vec<Detection>> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({
                "image": general_purpose::STANDARD.encode(image),
                "confidenceThreshold": params.confidence_threshold,
            }))
            .send()
            .await
            .map_err(|e| RegionEditError::Service(format!("Detection request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RegionEditError::Service(format!(
                "Detection error: {}",
                error_text
            )));
        }

        let mut body: serde_json::Value = response.json().await.map_err(|e| {
            RegionEditError::Service(format!("Failed to parse detection response: {}", e))
        })?;
        let list = if body.get("detections").is_some() {
            body["detections"].take()
        } else {
            body
        };
        Ok(serde_json::from_value(list)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(bbox: [f64; 4], confidence: f32) -> Detection {
        Detection { bbox, confidence }
    }

    #[test]
    fn converts_pixels_to_percent() {
        let regions = detections_to_regions(
            &[hit([20.0, 10.0, 60.0, 30.0], 0.9)],
            200,
            100,
            &DetectionParams::default(),
        );
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!((r.x, r.y, r.width, r.height), (10.0, 10.0, 20.0, 20.0));
        assert_eq!(r.source, RegionSource::Auto);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn filters_low_confidence() {
        let params = DetectionParams {
            confidence_threshold: 0.6,
            ..DetectionParams::default()
        };
        let regions = detections_to_regions(
            &[hit([0.0, 0.0, 10.0, 10.0], 0.59), hit([0.0, 0.0, 10.0, 10.0], 0.6)],
            100,
            100,
            &params,
        );
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn inflates_shifts_and_clamps() {
        let params = DetectionParams {
            inflation: 2.0,
            offset_x: 0.25,
            ..DetectionParams::default()
        };
        // 10x10 box centred at (15, 15) -> 20x20, shifted right by 5
        let regions =
            detections_to_regions(&[hit([10.0, 10.0, 20.0, 20.0], 1.0)], 100, 100, &params);
        let r = &regions[0];
        assert_eq!((r.x, r.y, r.width, r.height), (10.0, 5.0, 20.0, 20.0));

        let edge = detections_to_regions(&[hit([90.0, 0.0, 100.0, 10.0], 1.0)], 100, 100, &params);
        assert!(edge[0].x + edge[0].width <= 100.0);
        assert!(edge[0].validate().is_ok());
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        let regions = detections_to_regions(
            &[hit([5.0, 5.0, 5.0, 9.0], 1.0), hit([200.0, 0.0, 300.0, 10.0], 1.0)],
            100,
            100,
            &DetectionParams::default(),
        );
        assert!(regions.is_empty());
    }
}
