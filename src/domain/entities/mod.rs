//! Domain entity definitions.

mod image;
mod request;
mod slot;

pub use image::{CacheKey, DecodedImage, ImageSource, LoadedImage, ResourceId};
pub use request::{BindRequest, LoaderResult};
pub use slot::ImageSlot;
