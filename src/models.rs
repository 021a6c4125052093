// src/models.rs
use crate::errors::{RegionEditError, Result};
use crate::picture::{Picture, ensure_canvas};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionSource {
    Manual,
    Auto,
}

/// A rectangle in percent coordinates (0-100) of its owning image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: Uuid,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub status: RegionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_result: Option<Picture>,
    pub source: RegionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
}

/// Slack for float rounding when checking the 100% bound.
const PERCENT_EPSILON: f64 = 1e-9;

/// Absolute pixel rectangle against some reference size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && py >= self.y && px < self.x + self.width && py < self.y + self.height
    }
}

impl Region {
    pub fn new(x: f64, y: f64, width: f64, height: f64, source: RegionSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            x,
            y,
            width,
            height,
            status: RegionStatus::Pending,
            processed_result: None,
            source,
            prompt: None,
            ocr_text: None,
        }
    }

    /// Region covering the whole image, used when an image has no regions.
    pub fn full_canvas() -> Self {
        Self::new(0.0, 0.0, 100.0, 100.0, RegionSource::Auto)
    }

    /// Only pending and failed regions are eligible for submission.
    pub fn is_submittable(&self) -> bool {
        matches!(self.status, RegionStatus::Pending | RegionStatus::Failed)
    }

    /// Checks the committed-region invariants on the percent coordinates.
    pub fn validate(&self) -> Result<()> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(self.invalid("non-finite coordinates"));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(self.invalid("zero area"));
        }
        let limit = 100.0 + PERCENT_EPSILON;
        if self.x < 0.0 || self.y < 0.0 || self.x + self.width > limit || self.y + self.height > limit
        {
            return Err(self.invalid("outside the 0-100 range"));
        }
        Ok(())
    }

    /// Projects the percentages onto `reference_width` x `reference_height`.
    ///
    /// Coordinates are clamped to 0-100 first; a rectangle that collapses to
    /// zero pixels on either axis is rejected.
    pub fn pixel_rect(&self, reference_width: u32, reference_height: u32) -> Result<PixelRect> {
        ensure_canvas(reference_width, reference_height)?;
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(self.invalid("zero area"));
        }

        let (x0, x1) = project(self.x, self.width, reference_width);
        let (y0, y1) = project(self.y, self.height, reference_height);
        if x1 <= x0 || y1 <= y0 {
            return Err(self.invalid("collapses after clamping"));
        }

        Ok(PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn mark_processing(&mut self) {
        self.status = RegionStatus::Processing;
    }

    pub fn mark_completed(&mut self, result: Picture) {
        self.status = RegionStatus::Completed;
        self.processed_result = Some(result);
    }

    pub fn mark_failed(&mut self) {
        self.status = RegionStatus::Failed;
        self.processed_result = None;
    }

    pub fn mark_pending(&mut self) {
        self.status = RegionStatus::Pending;
        self.processed_result = None;
    }

    fn invalid(&self, reason: &str) -> RegionEditError {
        RegionEditError::InvalidRegion {
            id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn project(start: f64, extent: f64, size: u32) -> (u32, u32) {
    let lo = start.clamp(0.0, 100.0);
    let hi = (start + extent).clamp(0.0, 100.0);
    let to_px = |pct: f64| ((pct / 100.0) * size as f64).round() as u32;
    (to_px(lo).min(size), to_px(hi).min(size))
}

/// Complete restorable copy of an image's working state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageHistoryState {
    pub preview: Picture,
    pub regions: Vec<Region>,
    pub final_result: Option<Picture>,
    pub full_ai_result: Option<Picture>,
    #[serde(default)]
    pub full_ai_regions: Vec<Uuid>,
    pub width: u32,
    pub height: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: Uuid,
    pub name: String,
    /// The current "original" the user edits against.
    pub preview: Picture,
    pub regions: Vec<Region>,
    /// Last stitched composite.
    pub final_result: Option<Picture>,
    /// Last raw full-image model output, kept for re-extraction.
    pub full_ai_result: Option<Picture>,
    /// Regions whose results were cut from `full_ai_result`.
    #[serde(default)]
    pub full_ai_regions: Vec<Uuid>,
    pub width: u32,
    pub height: u32,
    pub skip: bool,
    pub history: Vec<ImageHistoryState>,
    pub history_index: usize,
}

impl Image {
    pub fn new(name: impl Into<String>, preview: Picture) -> Self {
        let (width, height) = preview.dimensions();
        let mut image = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            preview,
            regions: Vec::new(),
            final_result: None,
            full_ai_result: None,
            full_ai_regions: Vec::new(),
            width,
            height,
            skip: false,
            history: Vec::new(),
            history_index: 0,
        };
        image.history.push(image.snapshot());
        image
    }

    pub fn region(&self, region_id: Uuid) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == region_id)
    }

    pub fn region_mut(&mut self, region_id: Uuid) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.id == region_id)
    }

    pub fn submittable_regions(&self) -> Vec<Region> {
        self.regions
            .iter()
            .filter(|r| r.is_submittable())
            .cloned()
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| r.status == RegionStatus::Completed)
            .count()
    }

    pub fn snapshot(&self) -> ImageHistoryState {
        ImageHistoryState {
            preview: self.preview.clone(),
            regions: self.regions.clone(),
            final_result: self.final_result.clone(),
            full_ai_result: self.full_ai_result.clone(),
            full_ai_regions: self.full_ai_regions.clone(),
            width: self.width,
            height: self.height,
            recorded_at: Utc::now(),
        }
    }

    pub fn restore(&mut self, state: &ImageHistoryState) {
        self.preview = state.preview.clone();
        self.regions = state.regions.clone();
        self.final_result = state.final_result.clone();
        self.full_ai_result = state.full_ai_result.clone();
        self.full_ai_regions = state.full_ai_regions.clone();
        self.width = state.width;
        self.height = state.height;
    }
}
