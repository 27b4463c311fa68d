//! Image pipeline infrastructure.
//!
//! This module provides:
//! - Two-pass bounded decoding with power-of-two subsampling
//! - Memory caching with a byte-budget LRU
//! - A versioned, size-bounded disk cache with editor commit/abort
//! - The async load orchestrator and the result dispatcher

pub mod decoder;
pub mod disk_cache;
pub mod dispatcher;
pub mod loader;
pub mod memory_cache;

pub use disk_cache::{
    DEFAULT_DISK_CAPACITY, DEFAULT_MIN_FREE_SPACE, DiskCache, DiskCacheEditor,
};
pub use dispatcher::{ResultDispatcher, on_delivery_context};
pub use loader::ImageLoader;
pub use memory_cache::{CacheCost, CacheStats, DEFAULT_MEMORY_BUDGET, MemoryCache};
