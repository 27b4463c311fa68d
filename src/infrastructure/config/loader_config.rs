//! Loader configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{LoadError, LoadResult};
use crate::infrastructure::image::{
    DEFAULT_DISK_CAPACITY, DEFAULT_MEMORY_BUDGET, DEFAULT_MIN_FREE_SPACE,
};

const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "pixbind";
const APP_NAME: &str = "pixbind";

/// Tunable settings for an [`ImageLoader`](crate::infrastructure::image::ImageLoader).
///
/// All fields have sensible defaults and can be overridden from a TOML
/// file or programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directory for the disk cache. Defaults to the platform cache dir,
    /// falling back to a temp directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Disk cache namespace version. Bumping it invalidates every stored
    /// entry on the next open; wire it to the application build number.
    #[serde(default = "default_cache_version")]
    pub cache_version: u32,

    /// Memory cache budget in bytes.
    #[serde(default = "default_memory_budget")]
    pub memory_budget: u64,

    /// Disk cache capacity in bytes.
    #[serde(default = "default_disk_capacity")]
    pub disk_capacity: u64,

    /// Minimum free space the cache filesystem must have, in bytes.
    /// Below this the loader runs in memory+network-only mode.
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Maximum concurrently executing load tasks. Defaults to
    /// `2 * available_parallelism + 1`.
    #[serde(default)]
    pub max_concurrent_loads: Option<usize>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long a load waits for a concurrent writer of the same key to
    /// publish before degrading to its own direct fetch, in milliseconds.
    #[serde(default = "default_pending_write_wait_ms")]
    pub pending_write_wait_ms: u64,
}

const fn default_cache_version() -> u32 {
    1
}

const fn default_memory_budget() -> u64 {
    DEFAULT_MEMORY_BUDGET
}

const fn default_disk_capacity() -> u64 {
    DEFAULT_DISK_CAPACITY
}

const fn default_min_free_space() -> u64 {
    DEFAULT_MIN_FREE_SPACE
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_pending_write_wait_ms() -> u64 {
    5000
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_version: default_cache_version(),
            memory_budget: default_memory_budget(),
            disk_capacity: default_disk_capacity(),
            min_free_space: default_min_free_space(),
            max_concurrent_loads: None,
            request_timeout_secs: default_request_timeout_secs(),
            pending_write_wait_ms: default_pending_write_wait_ms(),
        }
    }
}

impl LoaderConfig {
    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> LoadResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LoadError::io(format!("failed to read config file: {e}")))?;
        toml::from_str(&contents).map_err(|e| LoadError::io(format!("invalid config file: {e}")))
    }

    /// The cache directory to use, resolving the platform default when
    /// none was configured.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// The concurrent-load bound, derived from available parallelism when
    /// not configured explicitly.
    #[must_use]
    pub fn worker_limit(&self) -> usize {
        self.max_concurrent_loads.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
            2 * cpus + 1
        })
    }

    /// HTTP request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Maximum wait for a concurrent writer to publish.
    #[must_use]
    pub const fn pending_write_wait(&self) -> Duration {
        Duration::from_millis(self.pending_write_wait_ms)
    }
}

/// Platform cache directory, with a temp-dir fallback.
fn default_cache_dir() -> PathBuf {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME).join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.cache_version, 1);
        assert_eq!(config.memory_budget, 64 * 1024 * 1024);
        assert_eq!(config.disk_capacity, 50 * 1024 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.worker_limit() >= 3);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: LoaderConfig = toml::from_str(
            r#"
            memory_budget = 1048576
            cache_version = 7
            "#,
        )
        .expect("failed to parse config");

        assert_eq!(config.memory_budget, 1_048_576);
        assert_eq!(config.cache_version, 7);
        // Everything else keeps its default.
        assert_eq!(config.disk_capacity, DEFAULT_DISK_CAPACITY);
        assert_eq!(config.pending_write_wait_ms, 5000);
    }

    #[test]
    fn test_effective_cache_dir_override() {
        let config = LoaderConfig {
            cache_dir: Some(PathBuf::from("/tmp/custom")),
            ..LoaderConfig::default()
        };
        assert_eq!(config.effective_cache_dir(), PathBuf::from("/tmp/custom"));
    }
}
