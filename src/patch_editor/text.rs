// src/patch_editor/text.rs
//! Text object layout and rasterisation.
//!
//! Horizontal text wraps greedily per character inside a bound width.
//! Vertical text is laid out in `font_size`-wide columns read right to left,
//! each character centred in its column and stacked top to bottom.

use super::glyphs::GlyphSource;
use crate::compositing::blend_pixel;
use crate::picture::MAX_DIMENSION;
use image::{Rgba, RgbaImage};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Color = [u8; 4];

/// Line spacing for horizontal text, as a multiple of the font size.
pub const LINE_HEIGHT: f32 = 1.2;

/// Outlines wider than this are drawn at this width.
pub const MAX_OUTLINE_WIDTH: f32 = 64.0;

/// A positioned text box in source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextObject {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    pub text: String,
    pub font_size: f32,
    pub color: Color,
    pub outline_color: Color,
    pub outline_width: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Color>,
    pub is_vertical: bool,
    pub is_bold: bool,
    /// Degrees clockwise around the box centre.
    pub rotation: f32,
}

impl TextObject {
    pub fn new(x: f32, y: f32, text: impl Into<String>, font_size: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            x,
            y,
            width: None,
            height: None,
            text: text.into(),
            font_size,
            color: [0, 0, 0, 255],
            outline_color: [255, 255, 255, 255],
            outline_width: 0.0,
            background_color: None,
            is_vertical: false,
            is_bold: false,
            rotation: 0.0,
        }
    }
}

/// One character cell, relative to the text box's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedChar {
    pub ch: char,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub chars: Vec<PlacedChar>,
    /// Box size: the explicit size when set, otherwise the measured extent.
    pub width: f32,
    pub height: f32,
}

pub fn layout(obj: &TextObject, glyphs: &dyn GlyphSource) -> TextLayout {
    if obj.is_vertical {
        layout_vertical(obj, glyphs)
    } else {
        layout_horizontal(obj, glyphs)
    }
}

fn layout_horizontal(obj: &TextObject, glyphs: &dyn GlyphSource) -> TextLayout {
    let size = obj.font_size;
    let line_height = size * LINE_HEIGHT;
    let mut lines: Vec<Vec<(char, f32)>> = Vec::new();

    for paragraph in obj.text.split('\n') {
        let mut line = Vec::new();
        let mut line_width = 0.0;
        for ch in paragraph.chars() {
            let advance = glyphs.advance(ch, size);
            if let Some(limit) = obj.width {
                if !line.is_empty() && line_width + advance > limit {
                    lines.push(std::mem::take(&mut line));
                    line_width = 0.0;
                }
            }
            line.push((ch, line_width));
            line_width += advance;
        }
        lines.push(line);
    }

    let mut measured_width: f32 = 0.0;
    let mut chars = Vec::new();
    for (row, line) in lines.iter().enumerate() {
        if let Some(&(last, x)) = line.last() {
            measured_width = measured_width.max(x + glyphs.advance(last, size));
        }
        chars.extend(line.iter().map(|&(ch, x)| PlacedChar {
            ch,
            x,
            y: row as f32 * line_height,
        }));
    }

    TextLayout {
        chars,
        width: obj.width.unwrap_or(measured_width),
        height: obj.height.unwrap_or(lines.len() as f32 * line_height),
    }
}

fn layout_vertical(obj: &TextObject, glyphs: &dyn GlyphSource) -> TextLayout {
    let size = obj.font_size;
    let rows_per_column = obj
        .height
        .map(|h| ((h / size).floor() as usize).max(1));

    let mut columns: Vec<Vec<char>> = Vec::new();
    for paragraph in obj.text.split('\n') {
        let chars: Vec<char> = paragraph.chars().collect();
        match rows_per_column {
            Some(rows) if !chars.is_empty() => {
                columns.extend(chars.chunks(rows).map(<[char]>::to_vec));
            }
            _ => columns.push(chars),
        }
    }

    let count = columns.len();
    let mut tallest = 0;
    let mut placed = Vec::new();
    for (index, column) in columns.iter().enumerate() {
        // first column is the rightmost one
        let column_x = match obj.width {
            Some(width) => width - (index + 1) as f32 * size,
            None => (count - 1 - index) as f32 * size,
        };
        tallest = tallest.max(column.len());
        for (row, &ch) in column.iter().enumerate() {
            let advance = glyphs.advance(ch, size);
            placed.push(PlacedChar {
                ch,
                x: column_x + (size - advance) / 2.0,
                y: row as f32 * size,
            });
        }
    }

    TextLayout {
        chars: placed,
        width: obj.width.unwrap_or(count as f32 * size),
        height: obj.height.unwrap_or(tallest as f32 * size),
    }
}

/// Draws `obj` onto `canvas`: optional background box, outline, then fill.
pub fn render_text_object(canvas: &mut RgbaImage, obj: &TextObject, glyphs: &dyn GlyphSource) {
    let laid_out = layout(obj, glyphs);
    if laid_out.width <= 0.0 || laid_out.height <= 0.0 {
        return;
    }

    let within = |v: f32| v.is_finite() && v <= MAX_DIMENSION as f32;
    if !within(laid_out.width) || !within(laid_out.height) || obj.outline_width.is_nan() {
        warn!("Skipping oversized text box {}", obj.id);
        return;
    }

    let outline_width = obj.outline_width.clamp(0.0, MAX_OUTLINE_WIDTH);
    let margin = outline_width.ceil() as u32 + 2;
    let local_w = (laid_out.width.ceil() as u32).saturating_add(margin * 2);
    let local_h = (laid_out.height.ceil() as u32).saturating_add(margin * 2);
    if local_w > MAX_DIMENSION || local_h > MAX_DIMENSION {
        warn!("Skipping oversized text box {}", obj.id);
        return;
    }
    let mut local = RgbaImage::new(local_w, local_h);
    let m = margin as f32;

    if let Some(bg) = obj.background_color {
        let (bw, bh) = (laid_out.width.ceil() as u32, laid_out.height.ceil() as u32);
        for y in margin..margin + bh {
            for x in margin..margin + bw {
                local.put_pixel(x, y, Rgba(bg));
            }
        }
    }

    let mut draw_pass = |color: Color, offsets: &[(f32, f32)]| {
        for placed in &laid_out.chars {
            for &(dx, dy) in offsets {
                glyphs.rasterize(
                    placed.ch,
                    obj.font_size,
                    (m + placed.x + dx, m + placed.y + dy),
                    &mut |x, y, coverage| paint(&mut local, x, y, color, coverage),
                );
            }
        }
    };

    if outline_width > 0.0 {
        draw_pass(obj.outline_color, &disk_offsets(outline_width));
    }
    let fill_offsets: &[(f32, f32)] = if obj.is_bold {
        &[(0.0, 0.0), (1.0, 0.0)]
    } else {
        &[(0.0, 0.0)]
    };
    draw_pass(obj.color, fill_offsets);

    let box_centre = (obj.x + laid_out.width / 2.0, obj.y + laid_out.height / 2.0);
    let local_centre = (m + laid_out.width / 2.0, m + laid_out.height / 2.0);
    composite_rotated(canvas, &local, local_centre, box_centre, obj.rotation);
}

fn paint(target: &mut RgbaImage, x: i32, y: i32, color: Color, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= target.width() || y as u32 >= target.height() {
        return;
    }
    let alpha = (color[3] as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
    if alpha == 0 {
        return;
    }
    let pixel = target.get_pixel_mut(x as u32, y as u32);
    *pixel = blend_pixel(*pixel, Rgba([color[0], color[1], color[2], alpha]));
}

fn disk_offsets(radius: f32) -> Vec<(f32, f32)> {
    let r = radius.ceil() as i32;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if (dx * dx + dy * dy) as f32 <= radius * radius && (dx, dy) != (0, 0) {
                offsets.push((dx as f32, dy as f32));
            }
        }
    }
    offsets
}

/// Blends `layer` onto `canvas`, rotating by `degrees` so that
/// `layer_centre` lands on `canvas_centre`. Nearest-neighbour sampling keeps
/// the unrotated case pixel-exact.
fn composite_rotated(
    canvas: &mut RgbaImage,
    layer: &RgbaImage,
    layer_centre: (f32, f32),
    canvas_centre: (f32, f32),
    degrees: f32,
) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (lw, lh) = (layer.width() as f32, layer.height() as f32);

    // bounding box of the rotated layer on the canvas
    let corners = [(0.0, 0.0), (lw, 0.0), (0.0, lh), (lw, lh)];
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for (cx, cy) in corners {
        let (dx, dy) = (cx - layer_centre.0, cy - layer_centre.1);
        let x = canvas_centre.0 + dx * cos - dy * sin;
        let y = canvas_centre.1 + dx * sin + dy * cos;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().max(0.0) as u32).min(canvas.width());
    let y1 = (max_y.ceil().max(0.0) as u32).min(canvas.height());

    for py in y0..y1 {
        for px in x0..x1 {
            let (dx, dy) = (
                px as f32 + 0.5 - canvas_centre.0,
                py as f32 + 0.5 - canvas_centre.1,
            );
            let lx = (layer_centre.0 + dx * cos + dy * sin).floor();
            let ly = (layer_centre.1 - dx * sin + dy * cos).floor();
            if lx < 0.0 || ly < 0.0 || lx >= lw || ly >= lh {
                continue;
            }
            let src = *layer.get_pixel(lx as u32, ly as u32);
            let dst = canvas.get_pixel_mut(px, py);
            *dst = blend_pixel(*dst, src);
        }
    }
}
