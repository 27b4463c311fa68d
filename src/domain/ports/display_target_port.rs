//! Port definition for display targets.

use std::sync::Arc;

use crate::domain::entities::{DecodedImage, ResourceId};

/// A UI element (or stand-in) that can show one image at a time.
///
/// The tag set via [`set_tag`](DisplayTarget::set_tag) is the single source
/// of truth for what the target should currently show. The dispatcher
/// compares it against a completed load's identifier and discards the
/// result if they differ, so a slow fetch for a rebound target can never
/// clobber the newer binding.
///
/// Implementations must be thread-safe: tags are written on the binding
/// caller's context and read on the delivery context.
pub trait DisplayTarget: Send + Sync {
    /// Tags the target with the resource it is now intended to show.
    fn set_tag(&self, id: ResourceId);

    /// Returns the currently intended resource, if any.
    fn tag(&self) -> Option<ResourceId>;

    /// Applies a decoded image to the target. Only called from the
    /// delivery context, and only when the staleness check passed.
    fn apply(&self, image: Arc<DecodedImage>);
}
