//! Load pipeline error types.

use thiserror::Error;

/// Result type for load pipeline operations.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Errors that can occur while resolving an image through the cache tiers.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The disk cache could not be opened or is not usable. The pipeline
    /// degrades to memory+network-only mode when this happens at startup.
    #[error("disk cache unavailable: {reason}")]
    DiskCacheUnavailable {
        /// Why the cache could not be used.
        reason: String,
    },

    /// A network download failed. Not retried automatically.
    #[error("network fetch failed: {message}")]
    NetworkFetchFailed {
        /// Connection, status, or stream error detail.
        message: String,
    },

    /// The downloaded or cached bytes are not a decodable image.
    #[error("image decode failed: {message}")]
    DecodeFailed {
        /// Decoder error detail.
        message: String,
    },

    /// Another writer holds the disk editor for this key.
    #[error("concurrent disk write in flight for key {key}")]
    ConcurrentWriteConflict {
        /// The contended cache key.
        key: String,
    },

    /// I/O error during a cache operation.
    #[error("io error: {message}")]
    Io {
        /// Underlying error detail.
        message: String,
    },
}

impl LoadError {
    /// Creates a disk-unavailable error.
    #[must_use]
    pub fn disk_unavailable(reason: impl Into<String>) -> Self {
        Self::DiskCacheUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFetchFailed {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Whether the pipeline can keep serving other requests after this
    /// error. Everything here is terminal for one request only; the caller
    /// simply never receives an image.
    #[must_use]
    pub const fn is_terminal_for_request(&self) -> bool {
        matches!(
            self,
            Self::NetworkFetchFailed { .. } | Self::DecodeFailed { .. } | Self::Io { .. }
        )
    }

    /// Whether a degraded path (direct decode without persisting) may
    /// recover this failure.
    #[must_use]
    pub const fn is_recoverable_degraded(&self) -> bool {
        matches!(
            self,
            Self::DiskCacheUnavailable { .. } | Self::ConcurrentWriteConflict { .. }
        )
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(LoadError::network("timeout").is_terminal_for_request());
        assert!(LoadError::decode("bad magic").is_terminal_for_request());
        assert!(!LoadError::disk_unavailable("no space").is_terminal_for_request());

        let conflict = LoadError::ConcurrentWriteConflict {
            key: "abc".to_string(),
        };
        assert!(conflict.is_recoverable_degraded());
        assert!(LoadError::disk_unavailable("no space").is_recoverable_degraded());
        assert!(!LoadError::network("timeout").is_recoverable_degraded());
    }

    #[test]
    fn test_io_conversion() {
        let err: LoadError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
