// src/patch_editor/glyphs.rs
use crate::errors::{RegionEditError, Result};
use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};

/// Per-character metrics and coverage used by the text renderer.
pub trait GlyphSource {
    /// Horizontal advance of `ch` at `size` pixels.
    fn advance(&self, ch: char, size: f32) -> f32;

    /// Reports coverage for `ch` drawn in a `size`-pixel line cell whose
    /// top-left corner is at `origin`. `plot` receives absolute pixel
    /// positions and coverage in 0..=1.
    fn rasterize(&self, ch: char, size: f32, origin: (f32, f32), plot: &mut dyn FnMut(i32, i32, f32));
}

/// Glyphs from a TrueType/OpenType font.
#[derive(Clone)]
pub struct FontGlyphs {
    font: FontArc,
}

impl FontGlyphs {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let font = FontArc::try_from_vec(data)
            .map_err(|e| RegionEditError::ImageProcessing(format!("Invalid font: {}", e)))?;
        Ok(Self { font })
    }

    pub fn new(font: FontArc) -> Self {
        Self { font }
    }
}

impl GlyphSource for FontGlyphs {
    fn advance(&self, ch: char, size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(size));
        scaled.h_advance(self.font.glyph_id(ch))
    }

    fn rasterize(&self, ch: char, size: f32, origin: (f32, f32), plot: &mut dyn FnMut(i32, i32, f32)) {
        let scale = PxScale::from(size);
        let ascent = self.font.as_scaled(scale).ascent();
        let glyph = self
            .font
            .glyph_id(ch)
            .with_scale_and_position(scale, point(origin.0, origin.1 + ascent));

        if let Some(outlined) = self.font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            let (left, top) = (bounds.min.x as i32, bounds.min.y as i32);
            outlined.draw(|x, y, coverage| plot(left + x as i32, top + y as i32, coverage));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_editor::text::LINE_HEIGHT;

    fn mono() -> FontGlyphs {
        FontGlyphs::from_bytes(include_bytes!("../../tests/fixtures/DejaVuSansMono.ttf").to_vec())
            .unwrap()
    }

    #[test]
    fn glyph_coverage_lands_inside_its_cell() {
        let glyphs = mono();
        let size = 20.0;
        let advance = glyphs.advance('H', size);
        assert!(advance > 0.0 && advance < size);

        let origin = (10.0, 10.0);
        let mut covered = Vec::new();
        glyphs.rasterize('H', size, origin, &mut |x, y, coverage| {
            if coverage > 0.0 {
                covered.push((x, y));
            }
        });

        assert!(!covered.is_empty());
        let right = (origin.0 + advance).ceil() as i32 + 1;
        let bottom = (origin.1 + size * LINE_HEIGHT).ceil() as i32;
        for (x, y) in covered {
            assert!((10..=right).contains(&x), "x {} outside the cell", x);
            assert!((10..=bottom).contains(&y), "y {} outside the cell", y);
        }
    }

    #[test]
    fn monospace_advances_match() {
        let glyphs = mono();
        assert_eq!(glyphs.advance('i', 16.0), glyphs.advance('W', 16.0));
    }

    #[test]
    fn whitespace_has_no_coverage() {
        let mut plotted = 0;
        mono().rasterize(' ', 16.0, (0.0, 0.0), &mut |_, _, _| plotted += 1);
        assert_eq!(plotted, 0);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = FontGlyphs::from_bytes(b"not a font".to_vec()).err().unwrap();
        assert!(matches!(err, RegionEditError::ImageProcessing(_)));
    }
}
