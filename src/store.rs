// src/store.rs
use crate::errors::{RegionEditError, Result};
use crate::history;
use crate::models::{Image, Region};
use crate::picture::Picture;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

pub type ImageList = Vec<Arc<Image>>;

/// Shared image list with copy-on-write updates.
///
/// Every update clones only the touched image and republishes the list, so
/// readers holding an earlier `Arc<Image>` keep a consistent view and
/// subscribers observe progress as each update lands.
#[derive(Clone)]
pub struct ImageStore {
    tx: Arc<watch::Sender<ImageList>>,
}

impl ImageStore {
    pub fn new(images: Vec<Image>) -> Self {
        let (tx, _rx) = watch::channel(images.into_iter().map(Arc::new).collect());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ImageList> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ImageList {
        self.tx.borrow().clone()
    }

    pub fn get(&self, image_id: Uuid) -> Result<Arc<Image>> {
        self.tx
            .borrow()
            .iter()
            .find(|i| i.id == image_id)
            .cloned()
            .ok_or_else(|| image_not_found(image_id))
    }

    pub fn add_image(&self, image: Image) -> Uuid {
        let id = image.id;
        self.tx.send_modify(|images| images.push(Arc::new(image)));
        id
    }

    pub fn replace_all(&self, images: Vec<Image>) {
        self.tx
            .send_replace(images.into_iter().map(Arc::new).collect());
    }

    /// Applies `patch` to the latest version of one image.
    pub fn update_image<R>(&self, image_id: Uuid, patch: impl FnOnce(&mut Image) -> R) -> Result<R> {
        let mut outcome = None;
        self.tx.send_if_modified(|images| {
            let Some(slot) = images.iter_mut().find(|i| i.id == image_id) else {
                return false;
            };
            let mut next = Image::clone(slot);
            outcome = Some(patch(&mut next));
            *slot = Arc::new(next);
            true
        });
        outcome.ok_or_else(|| image_not_found(image_id))
    }

    /// Applies `patch` to one region, leaving sibling regions as they are in
    /// the latest state.
    pub fn update_region<R>(
        &self,
        image_id: Uuid,
        region_id: Uuid,
        patch: impl FnOnce(&mut Region) -> R,
    ) -> Result<R> {
        self.update_image(image_id, |image| {
            image.region_mut(region_id).map(patch)
        })?
        .ok_or_else(|| RegionEditError::NotFound(format!("region {}", region_id)))
    }

    /// Applies `patch` to every listed region of one image in a single update.
    pub fn update_regions(
        &self,
        image_id: Uuid,
        region_ids: &[Uuid],
        mut patch: impl FnMut(&mut Region),
    ) -> Result<usize> {
        self.update_image(image_id, |image| {
            let mut touched = 0;
            for region in image.regions.iter_mut().filter(|r| region_ids.contains(&r.id)) {
                patch(region);
                touched += 1;
            }
            touched
        })
    }

    pub fn add_region(&self, image_id: Uuid, region: Region) -> Result<Uuid> {
        region.validate()?;
        let id = region.id;
        self.update_image(image_id, |image| image.regions.push(region))?;
        Ok(id)
    }

    /// Explicit user deletion; the pipeline itself never removes regions.
    pub fn remove_region(&self, image_id: Uuid, region_id: Uuid) -> Result<Region> {
        self.update_image(image_id, |image| {
            let index = image.regions.iter().position(|r| r.id == region_id)?;
            Some(image.regions.remove(index))
        })?
        .ok_or_else(|| RegionEditError::NotFound(format!("region {}", region_id)))
    }

    pub fn set_region_prompt(
        &self,
        image_id: Uuid,
        region_id: Uuid,
        prompt: Option<String>,
    ) -> Result<()> {
        self.update_region(image_id, region_id, |r| r.prompt = prompt)
    }

    /// Returns a region to `pending` so it can be submitted again.
    pub fn reset_region(&self, image_id: Uuid, region_id: Uuid) -> Result<()> {
        self.update_region(image_id, region_id, Region::mark_pending)
    }

    pub fn set_skip(&self, image_id: Uuid, skip: bool) -> Result<()> {
        self.update_image(image_id, |image| image.skip = skip)
    }

    pub fn commit(&self, image_id: Uuid, new_preview: Picture) -> Result<()> {
        self.update_image(image_id, |image| history::commit(image, new_preview))
    }

    pub fn undo(&self, image_id: Uuid) -> Result<bool> {
        self.update_image(image_id, history::undo)
    }

    pub fn redo(&self, image_id: Uuid) -> Result<bool> {
        self.update_image(image_id, history::redo)
    }
}

fn image_not_found(image_id: Uuid) -> RegionEditError {
    RegionEditError::NotFound(format!("image {}", image_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RegionSource, RegionStatus};
    use image::Rgba;

    fn store_with_two_regions() -> (ImageStore, Uuid, Uuid, Uuid) {
        let mut image = Image::new("p1", Picture::blank(10, 10, Rgba([0, 0, 0, 255])).unwrap());
        let a = Region::new(0.0, 0.0, 50.0, 50.0, RegionSource::Manual);
        let b = Region::new(50.0, 50.0, 50.0, 50.0, RegionSource::Manual);
        let (a_id, b_id) = (a.id, b.id);
        image.regions = vec![a, b];
        let id = image.id;
        (ImageStore::new(vec![image]), id, a_id, b_id)
    }

    #[test]
    fn update_region_touches_only_its_region() {
        let (store, image_id, a, b) = store_with_two_regions();
        let before = store.get(image_id).unwrap();

        store.update_region(image_id, a, Region::mark_processing).unwrap();
        store.update_region(image_id, b, Region::mark_failed).unwrap();

        let after = store.get(image_id).unwrap();
        assert_eq!(after.region(a).unwrap().status, RegionStatus::Processing);
        assert_eq!(after.region(b).unwrap().status, RegionStatus::Failed);
        // earlier readers keep their view
        assert!(before.regions.iter().all(|r| r.status == RegionStatus::Pending));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let (store, image_id, _, _) = store_with_two_regions();
        assert!(matches!(
            store.update_region(image_id, Uuid::new_v4(), |_| ()),
            Err(RegionEditError::NotFound(_))
        ));
        assert!(matches!(
            store.set_skip(Uuid::new_v4(), true),
            Err(RegionEditError::NotFound(_))
        ));
    }

    #[test]
    fn subscribers_see_updates() {
        let (store, image_id, a, _) = store_with_two_regions();
        let mut rx = store.subscribe();
        rx.borrow_and_update();
        store.update_region(image_id, a, Region::mark_failed).unwrap();
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update();
        assert_eq!(seen[0].region(a).unwrap().status, RegionStatus::Failed);
    }

    #[test]
    fn invalid_regions_are_not_added() {
        let (store, image_id, _, _) = store_with_two_regions();
        let bad = Region::new(90.0, 0.0, 20.0, 5.0, RegionSource::Manual);
        assert!(store.add_region(image_id, bad).is_err());
        assert_eq!(store.get(image_id).unwrap().regions.len(), 2);
    }

    #[test]
    fn remove_region_is_explicit() {
        let (store, image_id, a, _) = store_with_two_regions();
        let removed = store.remove_region(image_id, a).unwrap();
        assert_eq!(removed.id, a);
        assert!(store.remove_region(image_id, a).is_err());
    }
}
