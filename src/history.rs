// src/history.rs
//! Linear undo/redo over full image snapshots.
//!
//! Snapshots hold complete state (pictures are shared, not copied), so
//! restoring one is exact. Region edits between commits are folded into the
//! current entry before the index moves, which keeps undo followed by redo
//! an identity on the live fields.

use crate::models::Image;
use crate::picture::Picture;
use log::debug;

/// Entries kept per image; the oldest are dropped past this.
pub const IMAGE_HISTORY_CAP: usize = 50;

/// Makes `new_preview` the image's new baseline.
///
/// Any redo tail is discarded. The new entry starts from a blank slate: no
/// regions and no results.
pub fn commit(image: &mut Image, new_preview: Picture) {
    commit_capped(image, new_preview, IMAGE_HISTORY_CAP);
}

/// [`commit`] with an explicit history cap (at least one entry is kept).
pub fn commit_capped(image: &mut Image, new_preview: Picture, cap: usize) {
    sync_current(image);
    image.history.truncate(image.history_index + 1);

    let (width, height) = new_preview.dimensions();
    image.preview = new_preview;
    image.width = width;
    image.height = height;
    image.regions.clear();
    image.final_result = None;
    image.full_ai_result = None;
    image.full_ai_regions.clear();

    image.history.push(image.snapshot());
    let overflow = image.history.len().saturating_sub(cap.max(1));
    if overflow > 0 {
        image.history.drain(..overflow);
    }
    image.history_index = image.history.len() - 1;
    debug!(
        "Image {} committed baseline {} ({}x{})",
        image.id, image.history_index, width, height
    );
}

/// Steps back one entry. Returns `false` at the first entry.
pub fn undo(image: &mut Image) -> bool {
    if !can_undo(image) {
        return false;
    }
    sync_current(image);
    image.history_index -= 1;
    let state = image.history[image.history_index].clone();
    image.restore(&state);
    true
}

/// Steps forward one entry. Returns `false` at the tail.
pub fn redo(image: &mut Image) -> bool {
    if !can_redo(image) {
        return false;
    }
    sync_current(image);
    image.history_index += 1;
    let state = image.history[image.history_index].clone();
    image.restore(&state);
    true
}

pub fn can_undo(image: &Image) -> bool {
    image.history_index > 0
}

pub fn can_redo(image: &Image) -> bool {
    image.history_index + 1 < image.history.len()
}

fn sync_current(image: &mut Image) {
    let index = image.history_index;
    let Some(recorded_at) = image.history.get(index).map(|s| s.recorded_at) else {
        image.history.push(image.snapshot());
        image.history_index = image.history.len() - 1;
        return;
    };
    let mut snapshot = image.snapshot();
    snapshot.recorded_at = recorded_at;
    image.history[index] = snapshot;
}
