// src/patch_editor/raster.rs
//! Brush strokes and flood fill on the editor's paint layer.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushMode {
    Paint,
    Erase,
}

/// One completed freehand gesture in layer pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<(f32, f32)>,
    pub radius: f32,
    pub color: [u8; 4],
    pub mode: BrushMode,
}

impl Stroke {
    pub fn paint(points: Vec<(f32, f32)>, radius: f32, color: [u8; 4]) -> Self {
        Self {
            points,
            radius,
            color,
            mode: BrushMode::Paint,
        }
    }

    pub fn erase(points: Vec<(f32, f32)>, radius: f32) -> Self {
        Self {
            points,
            radius,
            color: [0, 0, 0, 0],
            mode: BrushMode::Erase,
        }
    }
}

/// Stamps a hard round brush along every segment of the stroke.
/// Returns false when nothing on the layer was touched.
pub fn apply_stroke(layer: &mut RgbaImage, stroke: &Stroke) -> bool {
    let value = match stroke.mode {
        BrushMode::Paint => Rgba(stroke.color),
        BrushMode::Erase => Rgba([0, 0, 0, 0]),
    };
    let radius = stroke.radius.max(0.5);
    let mut changed = false;

    let Some(&first) = stroke.points.first() else {
        return false;
    };
    changed |= stamp(layer, first, radius, value);

    for pair in stroke.points.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        let steps = length.ceil().max(1.0) as u32;
        for step in 1..=steps {
            let t = step as f32 / steps as f32;
            changed |= stamp(layer, (x0 + (x1 - x0) * t, y0 + (y1 - y0) * t), radius, value);
        }
    }
    changed
}

fn stamp(layer: &mut RgbaImage, centre: (f32, f32), radius: f32, value: Rgba<u8>) -> bool {
    let (w, h) = layer.dimensions();
    let x0 = (centre.0 - radius).floor().max(0.0) as u32;
    let y0 = (centre.1 - radius).floor().max(0.0) as u32;
    let x1 = ((centre.0 + radius).ceil().max(0.0) as u32).min(w);
    let y1 = ((centre.1 + radius).ceil().max(0.0) as u32).min(h);
    let r2 = radius * radius;
    let mut changed = false;

    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - centre.0;
            let dy = y as f32 + 0.5 - centre.1;
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let pixel = layer.get_pixel_mut(x, y);
            if *pixel != value {
                *pixel = value;
                changed = true;
            }
        }
    }
    changed
}

fn within_tolerance(p: [u8; 4], target: [u8; 4], tolerance: u8) -> bool {
    if p[3] == 0 && target[3] == 0 {
        return true;
    }
    p.iter()
        .zip(target.iter())
        .all(|(a, b)| a.abs_diff(*b) <= tolerance)
}

/// Fills the 4-connected area around `seed` whose colour in `reference` is
/// within `tolerance` of the seed colour, writing `color` into `layer`.
///
/// `reference` is what the user sees (base with the layer on top) and must
/// share the layer's dimensions. Returns the number of pixels changed.
pub fn flood_fill(
    layer: &mut RgbaImage,
    reference: &RgbaImage,
    seed: (u32, u32),
    color: [u8; 4],
    tolerance: u8,
) -> usize {
    let (w, h) = layer.dimensions();
    if seed.0 >= w || seed.1 >= h || reference.dimensions() != (w, h) {
        return 0;
    }

    let target = reference.get_pixel(seed.0, seed.1).0;
    let wu = w as usize;
    let mut visited = vec![false; wu * h as usize];
    let mut stack = vec![(seed.0, seed.1)];
    visited[seed.1 as usize * wu + seed.0 as usize] = true;
    let value = Rgba(color);
    let mut changed = 0;

    while let Some((x, y)) = stack.pop() {
        let pixel = layer.get_pixel_mut(x, y);
        if *pixel != value {
            *pixel = value;
            changed += 1;
        }

        let neighbours = [
            (x > 0).then(|| (x - 1, y)),
            (x + 1 < w).then(|| (x + 1, y)),
            (y > 0).then(|| (x, y - 1)),
            (y + 1 < h).then(|| (x, y + 1)),
        ];
        for (nx, ny) in neighbours.into_iter().flatten() {
            let idx = ny as usize * wu + nx as usize;
            if !visited[idx] && within_tolerance(reference.get_pixel(nx, ny).0, target, tolerance) {
                visited[idx] = true;
                stack.push((nx, ny));
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];

    #[test]
    fn stroke_covers_the_segment() {
        let mut layer = RgbaImage::new(20, 20);
        let touched = apply_stroke(&mut layer, &Stroke::paint(vec![(2.0, 10.0), (17.0, 10.0)], 1.5, RED));
        assert!(touched);
        for x in 2..17 {
            assert_eq!(layer.get_pixel(x, 10).0, RED, "x={}", x);
        }
        assert_eq!(layer.get_pixel(10, 2).0[3], 0);
    }

    #[test]
    fn eraser_clears_alpha() {
        let mut layer = RgbaImage::from_pixel(10, 10, Rgba(RED));
        apply_stroke(&mut layer, &Stroke::erase(vec![(5.0, 5.0)], 2.0));
        assert_eq!(layer.get_pixel(5, 5).0, [0, 0, 0, 0]);
        assert_eq!(layer.get_pixel(0, 0).0, RED);
    }

    #[test]
    fn empty_stroke_is_a_no_op() {
        let mut layer = RgbaImage::new(4, 4);
        assert!(!apply_stroke(&mut layer, &Stroke::paint(Vec::new(), 3.0, RED)));
    }

    #[test]
    fn fill_stops_at_boundaries() {
        // white canvas split by a black vertical line at x = 5
        let mut reference = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        for y in 0..10 {
            reference.put_pixel(5, y, Rgba([0, 0, 0, 255]));
        }
        let mut layer = RgbaImage::new(10, 10);
        let changed = flood_fill(&mut layer, &reference, (1, 1), RED, 10);
        assert_eq!(changed, 50);
        assert_eq!(layer.get_pixel(4, 9).0, RED);
        assert_eq!(layer.get_pixel(5, 0).0[3], 0);
        assert_eq!(layer.get_pixel(6, 0).0[3], 0);
    }

    #[test]
    fn fill_outside_or_mismatched_does_nothing() {
        let reference = RgbaImage::new(4, 4);
        let mut layer = RgbaImage::new(4, 4);
        assert_eq!(flood_fill(&mut layer, &reference, (9, 0), RED, 0), 0);
        assert_eq!(flood_fill(&mut layer, &RgbaImage::new(3, 3), (0, 0), RED, 0), 0);
    }
}
