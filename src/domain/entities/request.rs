//! Request and result value objects carried through the load pipeline.

use std::sync::Arc;

use super::image::{DecodedImage, ResourceId};
use crate::domain::ports::DisplayTarget;

/// A caller's request to display a resource on a target at a bounded size.
///
/// The target is tagged with the identifier when the request is created;
/// that tag is what the dispatcher later checks for staleness.
#[derive(Clone)]
pub struct BindRequest {
    /// Identifier of the image to load.
    pub id: ResourceId,
    /// Where the image should end up.
    pub target: Arc<dyn DisplayTarget>,
    /// Requested display width; zero disables downsampling.
    pub req_width: u32,
    /// Requested display height; zero disables downsampling.
    pub req_height: u32,
}

impl std::fmt::Debug for BindRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindRequest")
            .field("id", &self.id)
            .field("req_width", &self.req_width)
            .field("req_height", &self.req_height)
            .finish_non_exhaustive()
    }
}

/// A completed load on its way from a worker to the delivery context.
///
/// Lives for exactly one delivery attempt; the dispatcher either applies
/// it or drops it.
#[derive(Clone)]
pub struct LoaderResult {
    /// The target the request was bound to.
    pub target: Arc<dyn DisplayTarget>,
    /// The identifier the load was started for.
    pub id: ResourceId,
    /// The decoded image.
    pub image: Arc<DecodedImage>,
}

impl std::fmt::Debug for LoaderResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderResult")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
