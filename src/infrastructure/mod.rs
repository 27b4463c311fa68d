//! Infrastructure layer with cache, network, and configuration adapters.

/// Loader configuration.
pub mod config;
/// Image pipeline (decoding, caching, loading, delivery).
pub mod image;
/// Network adapters.
pub mod net;

pub use config::LoaderConfig;
pub use image::{
    CacheCost, CacheStats, DiskCache, DiskCacheEditor, ImageLoader, MemoryCache, ResultDispatcher,
};
pub use net::HttpFetcher;
