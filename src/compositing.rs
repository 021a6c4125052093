// src/compositing.rs
//! Stateless bitmap transforms between whole-image, per-region crop and
//! masked full-image representations.
//!
//! Region percentages are always projected onto the dimensions of the bitmap
//! actually being read, never onto an assumed size: a round-tripped model
//! output may come back at a different resolution.

use crate::errors::Result;
use crate::models::{PixelRect, Region, RegionStatus};
use crate::picture::{Picture, ensure_canvas};
use image::{Rgba, RgbaImage, imageops};
use log::warn;
use serde::{Deserialize, Serialize};

/// Fill used for masked-out areas and square padding.
pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Relative aspect difference tolerated before a rescale is reported.
const ASPECT_TOLERANCE: f64 = 0.01;

/// Extracts the pixel rectangle implied by `region` on `image`'s own size.
pub fn crop(image: &Picture, region: &Region) -> Result<Picture> {
    let rect = region.pixel_rect(image.width(), image.height())?;
    Ok(crop_rect(image.as_image(), rect))
}

fn crop_rect(image: &RgbaImage, rect: PixelRect) -> Picture {
    Picture::new(imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Builds the masked full image sent to the edit service.
///
/// Standard mode shows only the union of the region rectangles on a
/// background canvas. Inverted mode shows the whole original with the region
/// rectangles blanked out, asking the service to regenerate exactly those.
pub fn multi_mask(image: &Picture, regions: &[Region], inverted: bool) -> Result<Picture> {
    let (width, height) = image.dimensions();
    ensure_canvas(width, height)?;
    let source = image.as_image();

    let rects = regions
        .iter()
        .map(|r| r.pixel_rect(width, height))
        .collect::<Result<Vec<_>>>()?;

    let mut canvas = if inverted {
        source.clone()
    } else {
        RgbaImage::from_pixel(width, height, BACKGROUND)
    };

    for rect in rects {
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                let pixel = if inverted {
                    BACKGROUND
                } else {
                    *source.get_pixel(x, y)
                };
                canvas.put_pixel(x, y, pixel);
            }
        }
    }

    Ok(Picture::new(canvas))
}

/// What [`depad_from_square`] needs to undo [`pad_to_square`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddingInfo {
    pub original_width: u32,
    pub original_height: u32,
}

impl PaddingInfo {
    fn side(&self) -> u32 {
        self.original_width.max(self.original_height)
    }

    fn offsets(&self) -> (u32, u32) {
        let side = self.side();
        (
            (side - self.original_width) / 2,
            (side - self.original_height) / 2,
        )
    }
}

/// Centres `image` on a blank square canvas of side `max(width, height)`.
pub fn pad_to_square(image: &Picture) -> Result<(Picture, PaddingInfo)> {
    let (width, height) = image.dimensions();
    ensure_canvas(width, height)?;
    let info = PaddingInfo {
        original_width: width,
        original_height: height,
    };
    if width == height {
        return Ok((image.clone(), info));
    }

    let side = info.side();
    let (off_x, off_y) = info.offsets();
    let mut canvas = RgbaImage::from_pixel(side, side, BACKGROUND);
    imageops::replace(&mut canvas, image.as_image(), off_x as i64, off_y as i64);
    Ok((Picture::new(canvas), info))
}

/// Best-effort inverse of [`pad_to_square`].
///
/// The square may have been rescaled by the service, so the content
/// sub-rectangle is recomputed from the original aspect ratio against the
/// square's actual size, then resampled to the original dimensions.
pub fn depad_from_square(square: &Picture, info: &PaddingInfo) -> Result<Picture> {
    ensure_canvas(info.original_width, info.original_height)?;
    let (actual_w, actual_h) = square.dimensions();
    ensure_canvas(actual_w, actual_h)?;

    let side = info.side() as f64;
    let (off_x, off_y) = info.offsets();
    let scale_x = actual_w as f64 / side;
    let scale_y = actual_h as f64 / side;

    let x0 = ((off_x as f64 * scale_x).round() as u32).min(actual_w - 1);
    let y0 = ((off_y as f64 * scale_y).round() as u32).min(actual_h - 1);
    let content_w = ((info.original_width as f64 * scale_x).round() as u32)
        .clamp(1, actual_w - x0);
    let content_h = ((info.original_height as f64 * scale_y).round() as u32)
        .clamp(1, actual_h - y0);

    let content = crop_rect(
        square.as_image(),
        PixelRect {
            x: x0,
            y: y0,
            width: content_w,
            height: content_h,
        },
    );
    content.resized(info.original_width, info.original_height)
}

/// Re-extracts one region's fragment from a full-image model result.
///
/// The region is projected onto `full_result`'s actual size, cropped, and
/// resampled to the size the region has on the original image. With
/// `opaque_percent < 100` the fragment's edges are feathered.
pub fn extract_crop_feathered(
    full_result: &Picture,
    region: &Region,
    original_width: u32,
    original_height: u32,
    opaque_percent: f32,
) -> Result<Picture> {
    let source_rect = region.pixel_rect(full_result.width(), full_result.height())?;
    let target_rect = region.pixel_rect(original_width, original_height)?;

    let fragment = crop_rect(full_result.as_image(), source_rect)
        .resized(target_rect.width, target_rect.height)?;
    if opaque_percent >= 100.0 {
        return Ok(fragment);
    }

    let mut pixels = fragment.into_image();
    feather(&mut pixels, opaque_percent);
    Ok(Picture::new(pixels))
}

/// Multiplies alpha by an independent centre-opaque ramp on each axis.
///
/// The opaque core covers `opaque_percent / 100` of each axis, split evenly
/// between the two edges; the outermost pixel row and column reach zero.
pub fn feather(image: &mut RgbaImage, opaque_percent: f32) {
    let opaque = (opaque_percent.clamp(0.0, 100.0) / 100.0) as f64;
    if opaque >= 1.0 {
        return;
    }
    let (width, height) = image.dimensions();
    let ramp_x = axis_ramp(width, opaque);
    let ramp_y = axis_ramp(height, opaque);

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let factor = ramp_x[x as usize] * ramp_y[y as usize];
        pixel.0[3] = (pixel.0[3] as f64 * factor).round() as u8;
    }
}

fn axis_ramp(len: u32, opaque: f64) -> Vec<f64> {
    let fade = (1.0 - opaque) / 2.0;
    (0..len)
        .map(|i| {
            let t = if len > 1 {
                i as f64 / (len - 1) as f64
            } else {
                0.5
            };
            let edge = t.min(1.0 - t);
            if fade <= 0.0 {
                1.0
            } else {
                (edge / fade).min(1.0)
            }
        })
        .collect()
}

/// Draws every completed region's result over `base`, scaled into its
/// rectangle. Later regions overwrite earlier ones where they overlap.
pub fn stitch(base: &Picture, regions: &[Region]) -> Result<Picture> {
    let (width, height) = base.dimensions();
    ensure_canvas(width, height)?;
    let mut canvas = base.as_image().clone();

    for region in regions {
        let Some(result) = region
            .processed_result
            .as_ref()
            .filter(|_| region.status == RegionStatus::Completed)
        else {
            continue;
        };
        let rect = match region.pixel_rect(width, height) {
            Ok(rect) => rect,
            Err(e) => {
                warn!("Skipping region {} while stitching: {}", region.id, e);
                continue;
            }
        };
        let fragment = result.resized(rect.width, rect.height)?;
        blend_onto(&mut canvas, fragment.as_image(), rect.x, rect.y);
    }

    Ok(Picture::new(canvas))
}

/// Uses the model's full-image output as the background and puts `base`'s
/// own pixels back inside each region rectangle.
///
/// A result with a different size is rescaled to `base`'s dimensions; an
/// aspect-ratio change is accepted and logged.
pub fn stitch_inverted(
    base: &Picture,
    full_result: &Picture,
    regions: &[Region],
) -> Result<Picture> {
    let (width, height) = base.dimensions();
    ensure_canvas(width, height)?;
    ensure_canvas(full_result.width(), full_result.height())?;

    if aspect_differs(base.dimensions(), full_result.dimensions()) {
        warn!(
            "Full-image result is {}x{} but the original is {}x{}; rescaling distorts content",
            full_result.width(),
            full_result.height(),
            width,
            height
        );
    }
    let mut canvas = full_result.resized(width, height)?.into_image();

    for region in regions {
        let rect = region.pixel_rect(width, height)?;
        let original = crop_rect(base.as_image(), rect);
        imageops::replace(&mut canvas, original.as_image(), rect.x as i64, rect.y as i64);
    }

    Ok(Picture::new(canvas))
}

fn aspect_differs(a: (u32, u32), b: (u32, u32)) -> bool {
    let ra = a.0 as f64 / a.1 as f64;
    let rb = b.0 as f64 / b.1 as f64;
    ((ra - rb) / ra).abs() > ASPECT_TOLERANCE
}

/// Source-over composite of `top` onto `base` at (`x`, `y`), clipped.
pub(crate) fn blend_onto(base: &mut RgbaImage, top: &RgbaImage, x: u32, y: u32) {
    let (bw, bh) = base.dimensions();
    for (tx, ty, src) in top.enumerate_pixels() {
        let (px, py) = (x + tx, y + ty);
        if px >= bw || py >= bh {
            continue;
        }
        let dst = base.get_pixel_mut(px, py);
        *dst = blend_pixel(*dst, *src);
    }
}

pub(crate) fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    match src.0[3] {
        0 => dst,
        255 => src,
        _ => {
            let sa = src.0[3] as f32 / 255.0;
            let da = dst.0[3] as f32 / 255.0;
            let out_a = sa + da * (1.0 - sa);
            if out_a <= 0.0 {
                return Rgba([0, 0, 0, 0]);
            }
            let mut out = [0u8; 4];
            for c in 0..3 {
                let s = src.0[c] as f32;
                let d = dst.0[c] as f32;
                out[c] = ((s * sa + d * da * (1.0 - sa)) / out_a).round() as u8;
            }
            out[3] = (out_a * 255.0).round() as u8;
            Rgba(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RegionEditError;
    use crate::models::RegionSource;

    fn gradient(width: u32, height: u32) -> Picture {
        Picture::new(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 200) as u8, (y % 200) as u8, ((x + y) % 90) as u8, 255])
        }))
    }

    fn region(x: f64, y: f64, w: f64, h: f64) -> Region {
        Region::new(x, y, w, h, RegionSource::Manual)
    }

    fn completed(x: f64, y: f64, w: f64, h: f64, result: Picture) -> Region {
        let mut r = region(x, y, w, h);
        r.mark_completed(result);
        r
    }

    #[test]
    fn crop_takes_exact_rectangle() {
        let img = gradient(100, 50);
        let piece = crop(&img, &region(10.0, 20.0, 30.0, 40.0)).unwrap();
        assert_eq!(piece.dimensions(), (30, 20));
        assert_eq!(piece.as_image().get_pixel(0, 0), img.as_image().get_pixel(10, 10));
    }

    #[test]
    fn standard_mask_reveals_regions_only() {
        let img = gradient(100, 100);
        let regions = [region(0.0, 0.0, 30.0, 30.0), region(50.0, 60.0, 20.0, 10.0)];
        let masked = multi_mask(&img, &regions, false).unwrap();

        for r in &regions {
            assert_eq!(crop(&masked, r).unwrap(), crop(&img, r).unwrap());
        }
        assert_eq!(*masked.as_image().get_pixel(99, 99), BACKGROUND);
        assert_eq!(*masked.as_image().get_pixel(40, 10), BACKGROUND);
    }

    #[test]
    fn inverted_mask_blanks_regions_only() {
        let img = gradient(100, 100);
        let r = region(20.0, 20.0, 40.0, 40.0);
        let rect = r.pixel_rect(100, 100).unwrap();
        let masked = multi_mask(&img, std::slice::from_ref(&r), true).unwrap();

        for (x, y, pixel) in masked.as_image().enumerate_pixels() {
            if rect.contains(x, y) {
                assert_ne!(pixel, img.as_image().get_pixel(x, y));
            } else {
                assert_eq!(pixel, img.as_image().get_pixel(x, y));
            }
        }
    }

    #[test]
    fn pad_then_depad_is_identity_without_rescale() {
        let img = gradient(60, 25);
        let (square, info) = pad_to_square(&img).unwrap();
        assert_eq!(square.dimensions(), (60, 60));
        assert_eq!(*square.as_image().get_pixel(0, 0), BACKGROUND);
        let restored = depad_from_square(&square, &info).unwrap();
        assert_eq!(restored, img);
    }

    #[test]
    fn depad_recovers_dimensions_after_rescale() {
        let img = gradient(80, 40);
        let (square, info) = pad_to_square(&img).unwrap();
        let rescaled = square.resized(1024, 1024).unwrap();
        let restored = depad_from_square(&rescaled, &info).unwrap();
        assert_eq!(restored.dimensions(), (80, 40));
        // the content area must not contain padding
        assert_ne!(*restored.as_image().get_pixel(40, 0), BACKGROUND);
    }

    #[test]
    fn feather_at_100_keeps_alpha_opaque() {
        let full = gradient(200, 200);
        let crop = extract_crop_feathered(&full, &region(10.0, 10.0, 20.0, 20.0), 100, 100, 100.0)
            .unwrap();
        assert_eq!(crop.dimensions(), (20, 20));
        assert!(crop.as_image().pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn feather_is_opaque_in_centre_and_clear_in_corners() {
        let full = gradient(100, 100);
        let crop = extract_crop_feathered(&full, &region(10.0, 10.0, 21.0, 21.0), 100, 100, 60.0)
            .unwrap();
        let img = crop.as_image();
        assert_eq!(img.get_pixel(10, 10).0[3], 255);
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
        assert_eq!(img.get_pixel(20, 20).0[3], 0);
        // edges fade slower than corners
        assert!(img.get_pixel(10, 1).0[3] > img.get_pixel(1, 1).0[3]);
    }

    #[test]
    fn extraction_reprojects_onto_resized_result() {
        let full = Picture::blank(200, 200, Rgba([9, 9, 9, 255])).unwrap();
        let crop = extract_crop_feathered(&full, &region(50.0, 50.0, 50.0, 50.0), 64, 32, 100.0)
            .unwrap();
        assert_eq!(crop.dimensions(), (32, 16));
    }

    #[test]
    fn stitch_places_result_inside_rectangle() {
        let base = gradient(100, 100);
        let red = Picture::blank(20, 20, Rgba([255, 0, 0, 255])).unwrap();
        let out = stitch(&base, &[completed(10.0, 10.0, 20.0, 20.0, red)]).unwrap();
        let rect = PixelRect {
            x: 10,
            y: 10,
            width: 20,
            height: 20,
        };
        for (x, y, pixel) in out.as_image().enumerate_pixels() {
            if rect.contains(x, y) {
                assert_eq!(*pixel, Rgba([255, 0, 0, 255]));
            } else {
                assert_eq!(pixel, base.as_image().get_pixel(x, y));
            }
        }
    }

    #[test]
    fn stitch_ignores_incomplete_regions_and_later_wins() {
        let base = gradient(100, 100);
        let a = Picture::blank(5, 5, Rgba([1, 1, 1, 255])).unwrap();
        let b = Picture::blank(5, 5, Rgba([2, 2, 2, 255])).unwrap();
        let mut failed = region(0.0, 0.0, 100.0, 100.0);
        failed.processed_result = Some(a.clone());
        failed.status = RegionStatus::Failed;
        let out = stitch(
            &base,
            &[
                failed,
                completed(0.0, 0.0, 50.0, 50.0, a),
                completed(25.0, 25.0, 50.0, 50.0, b),
            ],
        )
        .unwrap();
        assert_eq!(*out.as_image().get_pixel(10, 10), Rgba([1, 1, 1, 255]));
        assert_eq!(*out.as_image().get_pixel(30, 30), Rgba([2, 2, 2, 255]));
        assert_eq!(out.as_image().get_pixel(90, 90), base.as_image().get_pixel(90, 90));
    }

    #[test]
    fn stitch_inverted_keeps_original_inside_regions() {
        let base = gradient(100, 100);
        let generated = Picture::blank(50, 50, Rgba([0, 200, 0, 255])).unwrap();
        let r = region(40.0, 40.0, 20.0, 20.0);
        let out = stitch_inverted(&base, &generated, std::slice::from_ref(&r)).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(out.as_image().get_pixel(45, 45), base.as_image().get_pixel(45, 45));
        assert_eq!(*out.as_image().get_pixel(5, 5), Rgba([0, 200, 0, 255]));
    }

    #[test]
    fn zero_sized_inputs_raise_empty_canvas() {
        let empty = Picture::new(RgbaImage::new(0, 0));
        assert!(matches!(
            pad_to_square(&empty),
            Err(RegionEditError::EmptyCanvas { .. })
        ));
        assert!(matches!(
            multi_mask(&empty, &[], false),
            Err(RegionEditError::EmptyCanvas { .. })
        ));
        let info = PaddingInfo {
            original_width: 0,
            original_height: 4,
        };
        assert!(depad_from_square(&gradient(4, 4), &info).is_err());
    }

    #[test]
    fn half_transparent_pixel_blends() {
        let out = blend_pixel(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 128]));
        assert_eq!(out.0[3], 255);
        assert!(out.0[0] > 120 && out.0[0] < 135);
    }
}
