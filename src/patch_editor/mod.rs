// src/patch_editor/mod.rs
//! Manual touch-up session over one fixed-size bitmap.
//!
//! A session holds a paint layer and an ordered list of text objects on top
//! of an immutable base. Discrete actions record a full snapshot of both
//! layers; drags and typing only record once they are committed.

pub mod glyphs;
pub mod history;
pub mod raster;
pub mod text;

pub use glyphs::{FontGlyphs, GlyphSource};
pub use history::{DEFAULT_HISTORY_CAP, EditorHistory, EditorState};
pub use raster::{BrushMode, Stroke};
pub use text::{TextObject, layout};

use crate::compositing::blend_onto;
use crate::errors::{RegionEditError, Result};
use crate::picture::{Picture, ensure_canvas};
use image::RgbaImage;
use log::debug;
use uuid::Uuid;

pub struct PatchEditor {
    base: Picture,
    raster: RgbaImage,
    texts: Vec<TextObject>,
    selected: Option<Uuid>,
    history: EditorHistory,
}

impl PatchEditor {
    pub fn new(base: Picture) -> Result<Self> {
        Self::with_history_cap(base, DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_cap(base: Picture, cap: usize) -> Result<Self> {
        let (width, height) = base.dimensions();
        ensure_canvas(width, height)?;
        let raster = RgbaImage::new(width, height);
        let history = EditorHistory::new(
            EditorState {
                raster: Picture::new(raster.clone()),
                texts: Vec::new(),
            },
            cap,
        );
        Ok(Self {
            base,
            raster,
            texts: Vec::new(),
            selected: None,
            history,
        })
    }

    pub fn base(&self) -> &Picture {
        &self.base
    }

    pub fn raster_layer(&self) -> &RgbaImage {
        &self.raster
    }

    pub fn texts(&self) -> &[TextObject] {
        &self.texts
    }

    pub fn text(&self, id: Uuid) -> Option<&TextObject> {
        self.texts.iter().find(|t| t.id == id)
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn history(&self) -> &EditorHistory {
        &self.history
    }

    /// Applies a finished brush or eraser gesture.
    pub fn stroke(&mut self, stroke: &Stroke) -> bool {
        let changed = raster::apply_stroke(&mut self.raster, stroke);
        if changed {
            self.record();
        }
        changed
    }

    /// Bucket fill against what is currently visible below the text layer.
    pub fn fill(&mut self, seed: (u32, u32), color: [u8; 4], tolerance: u8) -> usize {
        let mut visible = self.base.as_image().clone();
        blend_onto(&mut visible, &self.raster, 0, 0);
        let changed = raster::flood_fill(&mut self.raster, &visible, seed, color, tolerance);
        if changed > 0 {
            self.record();
        }
        changed
    }

    pub fn add_text(&mut self, text: TextObject) -> Uuid {
        let id = text.id;
        self.texts.push(text);
        self.selected = Some(id);
        self.record();
        id
    }

    pub fn delete_text(&mut self, id: Uuid) -> Result<TextObject> {
        let index = self.text_index(id)?;
        let removed = self.texts.remove(index);
        if self.selected == Some(id) {
            self.selected = None;
        }
        self.record();
        Ok(removed)
    }

    /// Applies a settled property change, such as a font or colour edit.
    pub fn update_text(&mut self, id: Uuid, patch: impl FnOnce(&mut TextObject)) -> Result<()> {
        let index = self.text_index(id)?;
        patch(&mut self.texts[index]);
        self.settle();
        Ok(())
    }

    /// In-progress typing; recorded by [`PatchEditor::commit_edit`].
    pub fn set_text_draft(&mut self, id: Uuid, text: impl Into<String>) -> Result<()> {
        let index = self.text_index(id)?;
        self.texts[index].text = text.into();
        Ok(())
    }

    pub fn commit_edit(&mut self) -> bool {
        self.settle()
    }

    /// Pointer drag; recorded by [`PatchEditor::commit_drag`].
    pub fn move_text(&mut self, id: Uuid, x: f32, y: f32) -> Result<()> {
        let index = self.text_index(id)?;
        let text = &mut self.texts[index];
        text.x = x;
        text.y = y;
        Ok(())
    }

    pub fn commit_drag(&mut self) -> bool {
        self.settle()
    }

    pub fn select_text(&mut self, id: Option<Uuid>) -> Result<()> {
        if let Some(id) = id {
            self.text_index(id)?;
        }
        self.selected = id;
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Steps back one recorded action. Unsettled edits are recorded first so
    /// they are what gets undone.
    pub fn undo(&mut self) -> bool {
        self.settle();
        match self.history.undo().cloned() {
            Some(state) => {
                self.restore(state);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.is_dirty() {
            return false;
        }
        match self.history.redo().cloned() {
            Some(state) => {
                self.restore(state);
                true
            }
            None => false,
        }
    }

    /// Flattens base, paint layer and text objects into one bitmap.
    pub fn render(&self, glyphs: &dyn GlyphSource) -> Result<Picture> {
        let mut canvas = self.base.as_image().clone();
        blend_onto(&mut canvas, &self.raster, 0, 0);
        for object in &self.texts {
            text::render_text_object(&mut canvas, object, glyphs);
        }
        Ok(Picture::new(canvas))
    }

    fn text_index(&self, id: Uuid) -> Result<usize> {
        self.texts
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| RegionEditError::NotFound(format!("text object {}", id)))
    }

    fn current_state(&self) -> EditorState {
        EditorState {
            raster: Picture::new(self.raster.clone()),
            texts: self.texts.clone(),
        }
    }

    fn is_dirty(&self) -> bool {
        let recorded = self.history.current();
        recorded.texts != self.texts || recorded.raster.as_image() != &self.raster
    }

    fn record(&mut self) {
        self.history.push(self.current_state());
        debug!(
            "Patch editor recorded state {} of {}",
            self.history.len(),
            self.history.cap()
        );
    }

    fn settle(&mut self) -> bool {
        if self.is_dirty() {
            self.record();
            true
        } else {
            false
        }
    }

    fn restore(&mut self, state: EditorState) {
        self.raster = state.raster.into_image();
        self.texts = state.texts;
        if let Some(id) = self.selected {
            if !self.texts.iter().any(|t| t.id == id) {
                self.selected = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn editor() -> PatchEditor {
        PatchEditor::new(Picture::blank(8, 8, Rgba([255, 255, 255, 255])).unwrap()).unwrap()
    }

    #[test]
    fn rejects_empty_base() {
        let empty = Picture::new(RgbaImage::new(0, 0));
        assert!(matches!(
            PatchEditor::new(empty),
            Err(RegionEditError::EmptyCanvas { .. })
        ));
    }

    #[test]
    fn drag_records_once_on_commit() {
        let mut editor = editor();
        let id = editor.add_text(TextObject::new(0.0, 0.0, "hi", 4.0));
        let recorded = editor.history().len();
        for step in 1..10 {
            editor.move_text(id, step as f32, 0.0).unwrap();
        }
        assert_eq!(editor.history().len(), recorded);
        assert!(editor.commit_drag());
        assert_eq!(editor.history().len(), recorded + 1);
        assert!(!editor.commit_drag());
    }

    #[test]
    fn undo_of_uncommitted_drag_reverts_it() {
        let mut editor = editor();
        let id = editor.add_text(TextObject::new(0.0, 0.0, "hi", 4.0));
        editor.move_text(id, 5.0, 5.0).unwrap();
        assert!(editor.undo());
        assert_eq!(editor.text(id).map(|t| t.x), Some(0.0));
    }

    #[test]
    fn fill_reads_base_through_layer() {
        let mut base = RgbaImage::from_pixel(6, 6, Rgba([255, 255, 255, 255]));
        for y in 0..6 {
            base.put_pixel(3, y, Rgba([0, 0, 0, 255]));
        }
        let mut editor = PatchEditor::new(Picture::new(base)).unwrap();
        assert_eq!(editor.fill((0, 0), [0, 255, 0, 255], 0), 18);
        assert!(editor.can_undo());
        assert_eq!(editor.fill((9, 9), [0, 255, 0, 255], 0), 0);
    }

    #[test]
    fn deleting_selected_text_clears_selection() {
        let mut editor = editor();
        let id = editor.add_text(TextObject::new(0.0, 0.0, "x", 4.0));
        assert_eq!(editor.selected(), Some(id));
        editor.delete_text(id).unwrap();
        assert_eq!(editor.selected(), None);
        assert!(editor.select_text(Some(id)).is_err());
    }
}
