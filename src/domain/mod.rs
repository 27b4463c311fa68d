//! Domain layer with core entities, errors, and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{
    BindRequest, CacheKey, DecodedImage, ImageSlot, ImageSource, LoadedImage, LoaderResult,
    ResourceId,
};
pub use errors::{LoadError, LoadResult};
pub use ports::{DisplayTarget, RemoteFetch};
