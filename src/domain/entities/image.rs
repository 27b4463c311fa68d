//! Core image types: resource identifiers, cache keys, and decoded pixels.

use sha2::{Digest, Sha256};

/// Opaque identifier for a remote image, typically its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a new `ResourceId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Fixed-length cache key derived from a [`ResourceId`].
///
/// The same identifier always derives the same key, so both cache tiers
/// agree on where an image lives. Keys are 32 lowercase hex characters
/// (128 bits), safe to use directly as filesystem entry names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the cache key for a resource identifier.
    ///
    /// SHA-256 of the identifier bytes, truncated to 128 bits. Collisions
    /// across distinct identifiers are an accepted low-probability risk.
    #[must_use]
    pub fn derive(id: &ResourceId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(id.as_str().as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    /// Returns the hex-encoded key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded, bounded-dimension image held in memory.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: image::DynamicImage,
}

impl DecodedImage {
    /// Wraps a decoded pixel buffer.
    #[must_use]
    pub fn new(image: image::DynamicImage) -> Self {
        Self { image }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Approximate byte footprint of the pixel buffer, used for memory
    /// cache accounting.
    #[must_use]
    pub fn cost(&self) -> u64 {
        self.image.as_bytes().len() as u64
    }

    /// Borrows the underlying pixels.
    #[must_use]
    pub fn image(&self) -> &image::DynamicImage {
        &self.image
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Found in the in-memory LRU cache.
    MemoryCache,
    /// Read from the on-disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A successfully loaded image together with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The identifier that was loaded.
    pub id: ResourceId,
    /// The decoded image, shared by reference.
    pub image: std::sync::Arc<DecodedImage>,
    /// Which tier satisfied the load.
    pub source: ImageSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation_is_deterministic() {
        let id = ResourceId::new("https://example.com/image.png");
        let key1 = CacheKey::derive(&id);
        let key2 = CacheKey::derive(&id);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_key_is_fixed_length_hex() {
        let key = CacheKey::derive(&ResourceId::new("anything at all, even / and :"));
        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_ids_derive_distinct_keys() {
        let a = CacheKey::derive(&ResourceId::new("https://example.com/a.png"));
        let b = CacheKey::derive(&ResourceId::new("https://example.com/b.png"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_decoded_image_cost_tracks_pixels() {
        let img = DecodedImage::new(image::DynamicImage::new_rgb8(10, 10));
        assert_eq!(img.width(), 10);
        assert_eq!(img.height(), 10);
        assert_eq!(img.cost(), 300); // 10 * 10 * 3 bytes
    }
}
