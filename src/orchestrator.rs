// src/orchestrator.rs
//! Drives images through mask/crop, the remote edit call and
//! extraction/stitching, updating the store as each call resolves.
//!
//! Per image the flow is: cropping, editing (remote), optional OCR detour,
//! extracting/stitching, done. Cancellation can cut in at any point; regions
//! left `processing` are put back to `pending` before `process` returns.

use crate::compositing::{
    PaddingInfo, crop, depad_from_square, extract_crop_feathered, multi_mask, pad_to_square, stitch,
    stitch_inverted,
};
use crate::config::ProcessConfig;
use crate::errors::{RegionEditError, Result};
use crate::models::{Image, Region, RegionStatus};
use crate::picture::Picture;
use crate::scheduler::{ConcurrencyLimiter, run_with_concurrency};
use crate::services::{
    DetectionParams, DetectionService, EditRequest, EditService, OcrService,
    detections_to_regions,
};
use crate::store::ImageStore;
use bytes::Bytes;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessScope {
    Selected(Uuid),
    /// Every image whose `skip` flag is off.
    All,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub images: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Regions put back to `pending` because the run was stopped.
    pub reset: usize,
    pub cancelled: bool,
}

#[derive(Default)]
struct Tally {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn submit(&self, n: usize) {
        self.submitted.fetch_add(n, Ordering::Relaxed);
    }

    fn complete(&self, n: usize) {
        self.completed.fetch_add(n, Ordering::Relaxed);
    }

    fn fail(&self, n: usize) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }
}

/// A picture prepared for upload plus what is needed to undo square padding.
struct Upload {
    picture: Picture,
    padding: Option<PaddingInfo>,
}

pub struct RegionProcessor {
    store: ImageStore,
    editor: Arc<dyn EditService>,
    detector: Option<Arc<dyn DetectionService>>,
    ocr: Option<Arc<dyn OcrService>>,
}

impl RegionProcessor {
    pub fn new(store: ImageStore, editor: Arc<dyn EditService>) -> Self {
        Self {
            store,
            editor,
            detector: None,
            ocr: None,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn DetectionService>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrService>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Runs every pending or failed region of the targeted images.
    ///
    /// `config.concurrency` bounds both the number of images driven at once
    /// and the system-wide number of in-flight remote calls. Configuration
    /// problems are reported before any work is admitted; per-region failures
    /// only mark that region `failed`.
    pub async fn process(
        &self,
        scope: ProcessScope,
        config: &ProcessConfig,
        cancel: &CancellationToken,
    ) -> Result<ProcessSummary> {
        config.validate()?;
        self.editor.ensure_configured()?;
        if config.ocr_context && self.ocr.is_none() {
            return Err(RegionEditError::Configuration(
                "OCR context requested but no OCR service is configured".to_string(),
            ));
        }

        let targets: Vec<Uuid> = match scope {
            ProcessScope::Selected(image_id) => vec![self.store.get(image_id)?.id],
            ProcessScope::All => self
                .store
                .snapshot()
                .iter()
                .filter(|image| !image.skip)
                .map(|image| image.id)
                .collect(),
        };
        info!(
            "Processing {} image(s) with concurrency {}",
            targets.len(),
            config.concurrency
        );

        let limiter = ConcurrencyLimiter::new(config.concurrency);
        let tally = Tally::default();
        let (limiter, tally) = (&limiter, &tally);

        run_with_concurrency(
            targets.iter().copied(),
            config.concurrency,
            move |image_id, _| self.process_image(image_id, config, limiter, cancel, tally),
            cancel,
        )
        .await;

        let mut summary = ProcessSummary {
            images: targets.len(),
            submitted: tally.submitted.load(Ordering::Relaxed),
            completed: tally.completed.load(Ordering::Relaxed),
            failed: tally.failed.load(Ordering::Relaxed),
            ..ProcessSummary::default()
        };

        if cancel.is_cancelled() {
            summary.cancelled = true;
            summary.reset = self.reset_processing(&targets);
            info!(
                "Processing stopped by user; {} region(s) returned to pending",
                summary.reset
            );
        } else {
            info!(
                "Processing finished: {} completed, {} failed",
                summary.completed, summary.failed
            );
        }
        Ok(summary)
    }

    async fn process_image(
        &self,
        image_id: Uuid,
        config: &ProcessConfig,
        limiter: &ConcurrencyLimiter,
        cancel: &CancellationToken,
        tally: &Tally,
    ) {
        if cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.drive_image(image_id, config, limiter, cancel, tally).await {
            warn!("Image {} could not be processed: {}", image_id, e);
        }
    }

    async fn drive_image(
        &self,
        image_id: Uuid,
        config: &ProcessConfig,
        limiter: &ConcurrencyLimiter,
        cancel: &CancellationToken,
        tally: &Tally,
    ) -> Result<()> {
        if config.process_full_image && self.store.get(image_id)?.regions.is_empty() {
            self.store.add_region(image_id, Region::full_canvas())?;
        }

        let image = self.store.get(image_id)?;
        let mut selected = Vec::new();
        for region in image.submittable_regions() {
            match region.pixel_rect(image.preview.width(), image.preview.height()) {
                Ok(_) => selected.push(region),
                Err(e) => {
                    warn!("Rejecting region {} of image {}: {}", region.id, image_id, e);
                    self.store.update_region(image_id, region.id, Region::mark_failed)?;
                    tally.fail(1);
                }
            }
        }
        if selected.is_empty() {
            debug!("Image {} has nothing to submit", image_id);
            return Ok(());
        }

        let ids: Vec<Uuid> = selected.iter().map(|r| r.id).collect();
        self.store
            .update_regions(image_id, &ids, Region::mark_processing)?;
        tally.submit(ids.len());

        if config.full_image_masking {
            self.run_full_image(&image, &selected, config, limiter, cancel, tally)
                .await?;
        } else {
            let image = &image;
            run_with_concurrency(
                selected,
                config.concurrency,
                move |region, _| self.run_region(image, region, config, limiter, cancel, tally),
                cancel,
            )
            .await;
        }

        if !config.full_image_masking || !config.inverted_mask {
            self.recompose(image_id)?;
        }
        Ok(())
    }

    async fn run_region(
        &self,
        image: &Image,
        region: Region,
        config: &ProcessConfig,
        limiter: &ConcurrencyLimiter,
        cancel: &CancellationToken,
        tally: &Tally,
    ) {
        let outcome = self
            .edit_region(image, &region, config, limiter, cancel)
            .await;

        let update = match outcome {
            Ok(_) if cancel.is_cancelled() => return,
            Ok(result) => {
                tally.complete(1);
                self.store.update_image(image.id, |img| {
                    // this result no longer comes from the stored full-image output
                    img.full_ai_regions.retain(|id| *id != region.id);
                    img.region_mut(region.id)
                        .map(|r| r.mark_completed(result))
                        .ok_or_else(|| RegionEditError::NotFound(format!("region {}", region.id)))
                })
                .and_then(|found| found)
            }
            Err(e) if e.is_cancellation() => return,
            Err(e) => {
                warn!("Region {} of image {} failed: {}", region.id, image.id, e);
                tally.fail(1);
                self.store
                    .update_region(image.id, region.id, Region::mark_failed)
            }
        };
        if let Err(e) = update {
            debug!("Region {} vanished before its result landed: {}", region.id, e);
        }
    }

    async fn edit_region(
        &self,
        image: &Image,
        region: &Region,
        config: &ProcessConfig,
        limiter: &ConcurrencyLimiter,
        cancel: &CancellationToken,
    ) -> Result<Picture> {
        let _permit = limiter.acquire_or_cancel(cancel).await?;
        debug!("Image {}: cropping region {}", image.id, region.id);
        let upload = prepare_upload(crop(&image.preview, region)?, config)?;

        let mut prompt = region
            .prompt
            .clone()
            .unwrap_or_else(|| config.prompt.clone());
        if config.ocr_context {
            let text = self.recognize(&upload.picture, cancel).await?;
            self.store.update_region(image.id, region.id, |r| {
                r.ocr_text = Some(text.clone())
            })?;
            prompt = with_text_context(&prompt, &text);
        }

        debug!("Image {}: editing region {}", image.id, region.id);
        let edited = self.call_editor(&upload.picture, prompt, config, cancel).await?;
        restore_upload(edited, &upload)
    }

    /// One remote call for the whole image, fanned back out to every region.
    async fn run_full_image(
        &self,
        image: &Image,
        selected: &[Region],
        config: &ProcessConfig,
        limiter: &ConcurrencyLimiter,
        cancel: &CancellationToken,
        tally: &Tally,
    ) -> Result<()> {
        let ids: Vec<Uuid> = selected.iter().map(|r| r.id).collect();
        let edited = match self
            .edit_full_image(image, selected, config, limiter, cancel)
            .await
        {
            Ok(_) if cancel.is_cancelled() => return Ok(()),
            Ok(edited) => edited,
            Err(e) if e.is_cancellation() => return Ok(()),
            Err(e) => {
                warn!("Full-image edit of {} failed: {}", image.id, e);
                self.store.update_regions(image.id, &ids, Region::mark_failed)?;
                tally.fail(ids.len());
                return Ok(());
            }
        };

        debug!("Image {}: extracting {} region(s)", image.id, ids.len());
        if config.inverted_mask {
            let composed = stitch_inverted(&image.preview, &edited, selected).and_then(|stitched| {
                let pieces = selected
                    .iter()
                    .map(|r| crop(&stitched, r).map(|p| (r.id, p)))
                    .collect::<Result<Vec<_>>>()?;
                Ok((stitched, pieces))
            });
            match composed {
                Ok((stitched, pieces)) => {
                    self.store.update_image(image.id, |img| {
                        img.full_ai_regions.clear();
                        for (id, piece) in pieces {
                            if let Some(region) = img.region_mut(id) {
                                region.mark_completed(piece);
                                img.full_ai_regions.push(id);
                            }
                        }
                        img.final_result = Some(stitched);
                        img.full_ai_result = Some(edited);
                    })?;
                    tally.complete(ids.len());
                }
                Err(e) => {
                    warn!("Inverted stitch of {} failed: {}", image.id, e);
                    self.store.update_regions(image.id, &ids, Region::mark_failed)?;
                    tally.fail(ids.len());
                }
            }
            return Ok(());
        }

        let fragments: Vec<(Uuid, Result<Picture>)> = selected
            .iter()
            .map(|r| {
                let fragment = extract_crop_feathered(
                    &edited,
                    r,
                    image.width,
                    image.height,
                    config.feather_opaque_percent,
                );
                (r.id, fragment)
            })
            .collect();

        let (mut completed, mut failed) = (0, 0);
        self.store.update_image(image.id, |img| {
            img.full_ai_regions.clear();
            for (id, fragment) in fragments {
                let Some(region) = img.region_mut(id) else {
                    continue;
                };
                match fragment {
                    Ok(piece) => {
                        region.mark_completed(piece);
                        img.full_ai_regions.push(id);
                        completed += 1;
                    }
                    Err(e) => {
                        warn!("Extracting region {} failed: {}", id, e);
                        region.mark_failed();
                        failed += 1;
                    }
                }
            }
            img.full_ai_result = Some(edited);
        })?;
        tally.complete(completed);
        tally.fail(failed);
        Ok(())
    }

    async fn edit_full_image(
        &self,
        image: &Image,
        selected: &[Region],
        config: &ProcessConfig,
        limiter: &ConcurrencyLimiter,
        cancel: &CancellationToken,
    ) -> Result<Picture> {
        let _permit = limiter.acquire_or_cancel(cancel).await?;
        debug!("Image {}: masking {} region(s)", image.id, selected.len());
        let masked = multi_mask(&image.preview, selected, config.inverted_mask)?;
        let upload = prepare_upload(masked, config)?;

        let mut prompt = config.prompt.clone();
        for extra in selected.iter().filter_map(|r| r.prompt.as_deref()) {
            if !prompt.is_empty() {
                prompt.push_str("; ");
            }
            prompt.push_str(extra);
        }
        if config.ocr_context {
            let text = self.recognize(&upload.picture, cancel).await?;
            prompt = with_text_context(&prompt, &text);
        }

        debug!("Image {}: editing full image", image.id);
        let edited = self.call_editor(&upload.picture, prompt, config, cancel).await?;
        restore_upload(edited, &upload)
    }

    async fn call_editor(
        &self,
        upload: &Picture,
        prompt: String,
        config: &ProcessConfig,
        cancel: &CancellationToken,
    ) -> Result<Picture> {
        if cancel.is_cancelled() {
            return Err(RegionEditError::Cancelled);
        }
        let sized = match config.max_upload_side {
            Some(max) => upload.fit_within(max)?,
            None => upload.clone(),
        };
        let request = EditRequest {
            image: Bytes::from(sized.to_png_bytes()?),
            prompt,
            model: None,
        };
        let bytes = self.editor.edit(&request, cancel).await?;
        if cancel.is_cancelled() {
            return Err(RegionEditError::Cancelled);
        }
        Picture::from_bytes(&bytes)
    }

    async fn recognize(&self, picture: &Picture, cancel: &CancellationToken) -> Result<String> {
        let ocr = self.ocr.as_ref().ok_or_else(|| {
            RegionEditError::Configuration("No OCR service is configured".to_string())
        })?;
        if cancel.is_cancelled() {
            return Err(RegionEditError::Cancelled);
        }
        let png = picture.to_png_bytes()?;
        tokio::select! {
            _ = cancel.cancelled() => Err(RegionEditError::Cancelled),
            text = ocr.recognize(&png) => text,
        }
    }

    /// Rebuilds `final_result` from the base and every completed region.
    fn recompose(&self, image_id: Uuid) -> Result<()> {
        let image = self.store.get(image_id)?;
        if image.completed_count() == 0 {
            return Ok(());
        }
        debug!("Image {}: stitching", image_id);
        let stitched = stitch(&image.preview, &image.regions)?;
        self.store
            .update_image(image_id, |img| img.final_result = Some(stitched))
    }

    fn reset_processing(&self, targets: &[Uuid]) -> usize {
        targets
            .iter()
            .filter_map(|&image_id| {
                self.store
                    .update_image(image_id, |img| {
                        let mut reset = 0;
                        for region in img
                            .regions
                            .iter_mut()
                            .filter(|r| r.status == RegionStatus::Processing)
                        {
                            region.mark_pending();
                            reset += 1;
                        }
                        reset
                    })
                    .ok()
            })
            .sum()
    }

    /// Recomputes the completed regions that were cut from the stored
    /// full-image result, using the current feather and mask settings.
    /// Regions completed by their own per-region call are left alone. No
    /// network call is made.
    pub fn reextract(&self, image_id: Uuid, config: &ProcessConfig) -> Result<()> {
        config.validate()?;
        let image = self.store.get(image_id)?;
        let full = image.full_ai_result.clone().ok_or_else(|| {
            RegionEditError::NotFound(format!("full-image result for image {}", image_id))
        })?;
        let completed: Vec<Region> = image
            .regions
            .iter()
            .filter(|r| {
                r.status == RegionStatus::Completed && image.full_ai_regions.contains(&r.id)
            })
            .cloned()
            .collect();
        if completed.is_empty() {
            debug!("Image {}: no regions to re-extract", image_id);
            return Ok(());
        }

        if config.inverted_mask {
            let stitched = stitch_inverted(&image.preview, &full, &completed)?;
            return self
                .store
                .update_image(image_id, |img| img.final_result = Some(stitched));
        }

        let fragments = completed
            .iter()
            .map(|r| {
                extract_crop_feathered(
                    &full,
                    r,
                    image.width,
                    image.height,
                    config.feather_opaque_percent,
                )
                .map(|p| (r.id, p))
            })
            .collect::<Result<Vec<_>>>()?;
        self.store.update_image(image_id, |img| {
            for (id, piece) in fragments {
                if let Some(region) = img.region_mut(id) {
                    region.processed_result = Some(piece);
                }
            }
        })?;
        self.recompose(image_id)
    }

    /// Runs the detector on the current preview and appends its boxes as
    /// pending `auto` regions.
    pub async fn detect_regions(
        &self,
        image_id: Uuid,
        params: &DetectionParams,
    ) -> Result<Vec<Uuid>> {
        let detector = self.detector.as_ref().ok_or_else(|| {
            RegionEditError::Configuration("No detection service is configured".to_string())
        })?;
        let image = self.store.get(image_id)?;
        let png = image.preview.to_png_bytes()?;
        let detections = detector.detect(&png, params).await?;

        let regions = detections_to_regions(
            &detections,
            image.preview.width(),
            image.preview.height(),
            params,
        );
        info!(
            "Detector returned {} box(es) for image {}, {} kept",
            detections.len(),
            image_id,
            regions.len()
        );
        regions
            .into_iter()
            .map(|region| self.store.add_region(image_id, region))
            .collect()
    }

    /// OCRs one region's crop of the current preview and stores the text.
    pub async fn recognize_region(&self, image_id: Uuid, region_id: Uuid) -> Result<String> {
        let image = self.store.get(image_id)?;
        let region = image
            .region(region_id)
            .ok_or_else(|| RegionEditError::NotFound(format!("region {}", region_id)))?;
        let piece = crop(&image.preview, region)?;
        let text = self.recognize(&piece, &CancellationToken::new()).await?;
        self.store
            .update_region(image_id, region_id, |r| r.ocr_text = Some(text.clone()))?;
        Ok(text)
    }

    /// Commits the latest stitched (or raw full-image) result as the image's
    /// new original.
    pub fn apply_result_as_original(&self, image_id: Uuid) -> Result<()> {
        let image = self.store.get(image_id)?;
        let result = image
            .final_result
            .clone()
            .or_else(|| image.full_ai_result.clone())
            .ok_or_else(|| {
                RegionEditError::NotFound(format!("result to apply for image {}", image_id))
            })?;
        info!("Applying result as new original for image {}", image_id);
        self.store.commit(image_id, result)
    }
}

fn prepare_upload(picture: Picture, config: &ProcessConfig) -> Result<Upload> {
    if config.square_padding {
        let (square, info) = pad_to_square(&picture)?;
        Ok(Upload {
            picture: square,
            padding: Some(info),
        })
    } else {
        Ok(Upload {
            picture,
            padding: None,
        })
    }
}

fn restore_upload(edited: Picture, upload: &Upload) -> Result<Picture> {
    match &upload.padding {
        Some(info) => depad_from_square(&edited, info),
        None => Ok(edited),
    }
}

fn with_text_context(prompt: &str, text: &str) -> String {
    if text.trim().is_empty() {
        return prompt.to_string();
    }
    format!("{}\n\nText present in the image:\n{}", prompt, text.trim())
}
