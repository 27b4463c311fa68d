//! In-crate display target backed by a mutex-guarded slot.

use std::sync::Arc;

use parking_lot::Mutex;

use super::image::{DecodedImage, ResourceId};
use crate::domain::ports::DisplayTarget;

/// A display target that simply holds the last applied image.
///
/// The tag is the single source of truth for what the slot should show;
/// rebinding replaces the tag immediately while any in-flight load keeps
/// running and is dropped at delivery time if the tag no longer matches.
#[derive(Debug, Default)]
pub struct ImageSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    tag: Option<ResourceId>,
    image: Option<Arc<DecodedImage>>,
}

impl ImageSlot {
    /// Creates an empty, untagged slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the currently displayed image, if any.
    #[must_use]
    pub fn image(&self) -> Option<Arc<DecodedImage>> {
        self.state.lock().image.clone()
    }

    /// Returns true once an image has been applied.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.lock().image.is_some()
    }
}

impl DisplayTarget for ImageSlot {
    fn set_tag(&self, id: ResourceId) {
        self.state.lock().tag = Some(id);
    }

    fn tag(&self) -> Option<ResourceId> {
        self.state.lock().tag.clone()
    }

    fn apply(&self, image: Arc<DecodedImage>) {
        self.state.lock().image = Some(image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        let slot = ImageSlot::new();
        assert!(slot.tag().is_none());

        slot.set_tag(ResourceId::new("a"));
        assert_eq!(slot.tag(), Some(ResourceId::new("a")));

        slot.set_tag(ResourceId::new("b"));
        assert_eq!(slot.tag(), Some(ResourceId::new("b")));
    }

    #[test]
    fn test_apply_keeps_image_across_retag() {
        let slot = ImageSlot::new();
        slot.set_tag(ResourceId::new("a"));
        slot.apply(Arc::new(DecodedImage::new(image::DynamicImage::new_rgb8(
            4, 4,
        ))));

        // Retagging alone must not clear the displayed image.
        slot.set_tag(ResourceId::new("b"));
        assert!(slot.is_resolved());
    }
}
