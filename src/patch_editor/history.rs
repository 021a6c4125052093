// src/patch_editor/history.rs
use super::text::TextObject;
use crate::picture::Picture;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAP: usize = 30;

/// Complete editor state: the paint layer plus every text object.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    pub raster: Picture,
    pub texts: Vec<TextObject>,
}

/// Linear snapshot history bounded to `cap` entries; the oldest entry is
/// dropped once the cap is exceeded.
#[derive(Debug)]
pub struct EditorHistory {
    entries: VecDeque<EditorState>,
    index: usize,
    cap: usize,
}

impl EditorHistory {
    pub fn new(initial: EditorState, cap: usize) -> Self {
        let mut entries = VecDeque::with_capacity(cap.max(1));
        entries.push_back(initial);
        Self {
            entries,
            index: 0,
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, state: EditorState) {
        self.entries.truncate(self.index + 1);
        self.entries.push_back(state);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        self.index = self.entries.len() - 1;
    }

    pub fn current(&self) -> &EditorState {
        &self.entries[self.index]
    }

    pub fn undo(&mut self) -> Option<&EditorState> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(&self.entries[self.index])
    }

    pub fn redo(&mut self) -> Option<&EditorState> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(&self.entries[self.index])
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn state(shade: u8) -> EditorState {
        EditorState {
            raster: Picture::blank(2, 2, Rgba([shade, 0, 0, 255])).unwrap(),
            texts: Vec::new(),
        }
    }

    #[test]
    fn push_truncates_redo_tail() {
        let mut history = EditorHistory::new(state(0), 10);
        history.push(state(1));
        history.push(state(2));
        history.undo();
        history.undo();
        history.push(state(3));
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert_eq!(history.current(), &state(3));
    }

    #[test]
    fn cap_drops_oldest() {
        let mut history = EditorHistory::new(state(0), 3);
        for shade in 1..=5 {
            history.push(state(shade));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.undo(), Some(&state(4)));
        assert_eq!(history.undo(), Some(&state(3)));
        assert_eq!(history.undo(), None);
    }

    #[test]
    fn boundaries_are_no_ops() {
        let mut history = EditorHistory::new(state(0), 3);
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert_eq!(history.current(), &state(0));
    }
}
