//! Versioned, size-bounded disk cache for raw encoded image bytes.
//!
//! Entries are single files named by cache key. Writes go through an
//! exclusive [`DiskCacheEditor`] that stages into a temp file and commits
//! with an atomic rename, so readers never observe a partial entry.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{LoadError, LoadResult};

use super::dispatcher;

/// Default maximum disk cache size in bytes (50 MiB).
pub const DEFAULT_DISK_CAPACITY: u64 = 50 * 1024 * 1024;

/// Default minimum free space required to open the cache (50 MiB).
pub const DEFAULT_MIN_FREE_SPACE: u64 = 50 * 1024 * 1024;

const ENTRY_EXT: &str = "img";
const TMP_EXT: &str = "tmp";
const VERSION_FILE: &str = "version";

/// Persistent key-value store of encoded image bytes.
///
/// Cheap to clone; all clones share one store. Opening with a different
/// version than the one recorded on disk wipes every entry.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<DiskInner>,
}

struct DiskInner {
    root: PathBuf,
    capacity: u64,
    current_size: AtomicU64,
    writers: Mutex<HashSet<CacheKey>>,
    released: Notify,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.inner.root)
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

impl DiskCache {
    /// Opens (or creates) a cache rooted at `root`.
    ///
    /// Stale temp files from a previous crash are removed, and a version
    /// mismatch invalidates every stored entry before use.
    ///
    /// # Errors
    /// Returns [`LoadError::DiskCacheUnavailable`] when the directory
    /// cannot be initialized or the filesystem has less than `min_free`
    /// bytes available. Callers are expected to degrade to
    /// memory+network-only mode on that error.
    pub async fn open(
        root: PathBuf,
        version: u32,
        capacity: u64,
        min_free: u64,
    ) -> LoadResult<Self> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| LoadError::disk_unavailable(format!("failed to create cache dir: {e}")))?;

        let free = available_space(&root);
        if free < min_free {
            return Err(LoadError::disk_unavailable(format!(
                "insufficient free space: {free} bytes available, {min_free} required"
            )));
        }

        let cache = Self {
            inner: Arc::new(DiskInner {
                root,
                capacity,
                current_size: AtomicU64::new(0),
                writers: Mutex::new(HashSet::new()),
                released: Notify::new(),
            }),
        };

        cache.check_version(version).await?;
        cache.scan_entries().await?;

        debug!(
            root = %cache.inner.root.display(),
            version = version,
            capacity = capacity,
            size = cache.size_bytes(),
            "Opened disk cache"
        );
        Ok(cache)
    }

    /// Wipes all entries if the on-disk version differs from `version`,
    /// then records the current version.
    async fn check_version(&self, version: u32) -> LoadResult<()> {
        let version_path = self.inner.root.join(VERSION_FILE);

        let stored = match fs::read_to_string(&version_path).await {
            Ok(s) => s.trim().parse::<u32>().ok(),
            Err(_) => None,
        };

        if stored != Some(version) {
            if let Some(old) = stored {
                debug!(
                    old_version = old,
                    new_version = version,
                    "Disk cache version changed, invalidating all entries"
                );
            }
            self.wipe_entries().await;
            fs::write(&version_path, version.to_string())
                .await
                .map_err(|e| {
                    LoadError::disk_unavailable(format!("failed to write version marker: {e}"))
                })?;
        }
        Ok(())
    }

    /// Sums existing entry sizes and removes temp files left behind by an
    /// interrupted writer.
    async fn scan_entries(&self) -> LoadResult<()> {
        let mut total = 0u64;
        let mut entries = fs::read_dir(&self.inner.root)
            .await
            .map_err(|e| LoadError::disk_unavailable(format!("failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TMP_EXT) {
                let _ = fs::remove_file(&path).await;
            } else if path.extension().is_some_and(|ext| ext == ENTRY_EXT)
                && let Ok(meta) = entry.metadata().await
            {
                total += meta.len();
            }
        }

        self.inner.current_size.store(total, Ordering::Relaxed);
        Ok(())
    }

    async fn wipe_entries(&self) {
        let Ok(mut entries) = fs::read_dir(&self.inner.root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_cache_file = path
                .extension()
                .is_some_and(|ext| ext == ENTRY_EXT || ext == TMP_EXT);
            if is_cache_file && fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove cache file during wipe");
            }
        }
        self.inner.current_size.store(0, Ordering::Relaxed);
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.inner.root.join(format!("{}.{ENTRY_EXT}", key.as_str()))
    }

    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        self.inner.root.join(format!("{}.{TMP_EXT}", key.as_str()))
    }

    /// Reads the committed bytes for a key, touching its recency.
    ///
    /// Tolerated on the delivery context only as a degraded allowance; a
    /// warning is logged when that happens.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        if dispatcher::on_delivery_context() {
            warn!(key = %key, "Disk cache read on the delivery context; move this to a worker");
        }

        let path = self.entry_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, size = bytes.len(), "Disk cache hit");
                // Refresh mtime so eviction treats this entry as recent.
                // set_modified has no async counterpart, so the touch runs
                // on the blocking pool.
                let _ = tokio::task::spawn_blocking(move || {
                    std::fs::File::options()
                        .append(true)
                        .open(&path)
                        .and_then(|file| file.set_modified(SystemTime::now()))
                })
                .await;
                Some(bytes)
            }
            Err(_) => {
                trace!(key = %key, "Disk cache miss");
                None
            }
        }
    }

    /// Opens an exclusive write handle for a key.
    ///
    /// Returns `None` when another editor for the same key is still in
    /// flight; the caller should wait for that writer to publish (see
    /// [`await_pending_write`](Self::await_pending_write)) rather than
    /// fetching the same resource again.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] when the staging file cannot be created.
    pub async fn edit(&self, key: &CacheKey) -> LoadResult<Option<DiskCacheEditor>> {
        if !self.inner.writers.lock().insert(key.clone()) {
            trace!(key = %key, "Editor already in flight for key");
            return Ok(None);
        }

        let tmp_path = self.tmp_path(key);
        let file = match fs::File::create(&tmp_path).await {
            Ok(file) => file,
            Err(e) => {
                self.inner.release(key);
                return Err(LoadError::io(format!("failed to create staging file: {e}")));
            }
        };

        Ok(Some(DiskCacheEditor {
            inner: self.inner.clone(),
            key: key.clone(),
            tmp_path,
            final_path: self.entry_path(key),
            file: Some(file),
            written: 0,
            finished: false,
        }))
    }

    /// Waits until no writer holds the key, up to `max_wait`.
    ///
    /// Returns true when the key was released in time (committed or
    /// aborted), false on timeout.
    pub async fn await_pending_write(&self, key: &CacheKey, max_wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let released = self.inner.released.notified();
            if !self.inner.writers.lock().contains(key) {
                return true;
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return false;
            }
        }
    }

    /// Total size of committed entries in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.inner.current_size.load(Ordering::Relaxed)
    }
}

impl DiskInner {
    fn release(&self, key: &CacheKey) {
        self.writers.lock().remove(key);
        self.released.notify_waiters();
    }

    /// Removes oldest entries (by mtime) until the cache fits its
    /// capacity with 10% slack.
    async fn evict_if_needed(&self) {
        let current = self.current_size.load(Ordering::Relaxed);
        if current <= self.capacity {
            return;
        }

        debug!(
            current = current,
            capacity = self.capacity,
            "Disk cache over capacity, evicting"
        );

        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return;
        };

        let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != ENTRY_EXT) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((path, modified, meta.len()));
            }
        }

        files.sort_by_key(|(_, modified, _)| *modified);

        let target = current - self.capacity + self.capacity / 10;
        let mut freed = 0u64;
        for (path, _, size) in files {
            if freed >= target {
                break;
            }
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to evict cache entry");
            } else {
                trace!(path = %path.display(), "Evicted disk cache entry");
                freed += size;
            }
        }
        self.current_size.fetch_sub(freed, Ordering::Relaxed);
    }
}

/// Exclusive write handle for one disk cache entry.
///
/// Holds the per-key writer slot until committed, aborted, or dropped.
/// Dropping without committing discards the staged bytes.
pub struct DiskCacheEditor {
    inner: Arc<DiskInner>,
    key: CacheKey,
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: Option<fs::File>,
    written: u64,
    finished: bool,
}

impl DiskCacheEditor {
    /// Appends bytes to the staged entry.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] on write failure; the caller should then
    /// abort the editor.
    pub async fn write_all(&mut self, bytes: &[u8]) -> LoadResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)
                .await
                .map_err(|e| LoadError::io(format!("failed to write staging file: {e}")))?;
            self.written += bytes.len() as u64;
        }
        Ok(())
    }

    /// Publishes the staged bytes as the committed entry.
    ///
    /// Flushes the staging file, then renames it into place so readers see
    /// either the old entry or the complete new one, never a partial write.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] on flush or rename failure; the staged
    /// file is discarded in that case.
    pub async fn commit(mut self) -> LoadResult<()> {
        self.finished = true;

        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                self.discard_tmp().await;
                self.inner.release(&self.key);
                return Err(LoadError::io(format!("failed to flush staging file: {e}")));
            }
            drop(file);
        }

        let old_size = fs::metadata(&self.final_path).await.map(|m| m.len()).ok();

        if let Err(e) = fs::rename(&self.tmp_path, &self.final_path).await {
            self.discard_tmp().await;
            self.inner.release(&self.key);
            return Err(LoadError::io(format!("failed to publish cache entry: {e}")));
        }

        if let Some(old) = old_size {
            self.inner.current_size.fetch_sub(old, Ordering::Relaxed);
        }
        self.inner
            .current_size
            .fetch_add(self.written, Ordering::Relaxed);

        debug!(key = %self.key, size = self.written, "Committed disk cache entry");

        self.inner.release(&self.key);
        self.inner.evict_if_needed().await;
        Ok(())
    }

    /// Discards the staged bytes and releases the key.
    pub async fn abort(mut self) {
        self.finished = true;
        self.file.take();
        self.discard_tmp().await;
        self.inner.release(&self.key);
        debug!(key = %self.key, "Aborted disk cache edit");
    }

    async fn discard_tmp(&self) {
        let _ = fs::remove_file(&self.tmp_path).await;
    }
}

impl Drop for DiskCacheEditor {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.tmp_path);
            self.inner.release(&self.key);
        }
    }
}

/// Available bytes on the filesystem holding `path`.
#[cfg(unix)]
fn available_space(path: &std::path::Path) -> u64 {
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return u64::MAX;
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: cpath is a valid NUL-terminated string and stat is a valid
    // out-pointer for the duration of the call.
    if unsafe { libc::statvfs(cpath.as_ptr(), &raw mut stat) } == 0 {
        #[allow(clippy::unnecessary_cast)]
        return stat.f_bavail as u64 * stat.f_frsize as u64;
    }
    warn!(path = %path.display(), "statvfs failed, skipping free-space check");
    u64::MAX
}

#[cfg(not(unix))]
fn available_space(_path: &std::path::Path) -> u64 {
    u64::MAX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ResourceId;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(&ResourceId::new(name))
    }

    async fn open_cache(dir: &TempDir) -> DiskCache {
        DiskCache::open(dir.path().to_path_buf(), 1, 1024 * 1024, 0)
            .await
            .unwrap()
    }

    async fn commit_entry(cache: &DiskCache, name: &str, bytes: &[u8]) {
        let mut editor = cache.edit(&key(name)).await.unwrap().unwrap();
        editor.write_all(bytes).await.unwrap();
        editor.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        commit_entry(&cache, "a", b"exact bytes back").await;

        assert_eq!(cache.get(&key("a")).await.unwrap(), b"exact bytes back");
        assert_eq!(cache.size_bytes(), 16);
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;
        assert!(cache.get(&key("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_abort_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        let mut editor = cache.edit(&key("a")).await.unwrap().unwrap();
        editor.write_all(b"partial").await.unwrap();
        editor.abort().await;

        assert!(cache.get(&key("a")).await.is_none());
        // Staging file must be gone too.
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_concurrent_editor_exclusion() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        let first = cache.edit(&key("a")).await.unwrap();
        assert!(first.is_some());

        let second = cache.edit(&key("a")).await.unwrap();
        assert!(second.is_none());

        // A different key is unaffected.
        assert!(cache.edit(&key("b")).await.unwrap().is_some());

        first.unwrap().commit().await.unwrap();
        assert!(cache.edit(&key("a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_releases_writer() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        {
            let _editor = cache.edit(&key("a")).await.unwrap().unwrap();
        }

        assert!(cache.edit(&key("a")).await.unwrap().is_some());
        assert!(cache.get(&key("a")).await.is_none());
    }

    #[tokio::test]
    async fn test_await_pending_write() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        let editor = cache.edit(&key("a")).await.unwrap().unwrap();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .await_pending_write(&key("a"), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        editor.commit().await.unwrap();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_await_pending_write_timeout() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        let _editor = cache.edit(&key("a")).await.unwrap().unwrap();
        let released = cache
            .await_pending_write(&key("a"), Duration::from_millis(50))
            .await;
        assert!(!released);
    }

    #[tokio::test]
    async fn test_version_bump_invalidates_entries() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open_cache(&dir).await;
            commit_entry(&cache, "a", b"old data").await;
        }

        let cache = DiskCache::open(dir.path().to_path_buf(), 2, 1024 * 1024, 0)
            .await
            .unwrap();
        assert!(cache.get(&key("a")).await.is_none());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_same_version_keeps_entries() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open_cache(&dir).await;
            commit_entry(&cache, "a", b"kept").await;
        }

        let cache = open_cache(&dir).await;
        assert_eq!(cache.get(&key("a")).await.unwrap(), b"kept");
        assert_eq!(cache.size_bytes(), 4);
    }

    #[tokio::test]
    async fn test_eviction_removes_oldest_first() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path().to_path_buf(), 1, 10, 0)
            .await
            .unwrap();

        commit_entry(&cache, "old", b"123456").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        commit_entry(&cache, "new", b"123456").await;

        // 12 bytes > 10 capacity: the older entry goes.
        assert!(cache.get(&key("old")).await.is_none());
        assert_eq!(cache.get(&key("new")).await.unwrap(), b"123456");
        assert_eq!(cache.size_bytes(), 6);
    }

    #[tokio::test]
    async fn test_read_refreshes_entry_recency() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path().to_path_buf(), 1, 15, 0)
            .await
            .unwrap();

        commit_entry(&cache, "a", b"123456").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        commit_entry(&cache, "b", b"123456").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Reading "a" touches its mtime, making "b" the oldest entry.
        assert!(cache.get(&key("a")).await.is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 18 bytes > 15 capacity: eviction removes "b", not the
        // freshly-read "a".
        commit_entry(&cache, "c", b"123456").await;

        assert!(cache.get(&key("b")).await.is_none());
        assert!(cache.get(&key("a")).await.is_some());
        assert!(cache.get(&key("c")).await.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_fails_on_insufficient_space() {
        let dir = TempDir::new().unwrap();
        let result = DiskCache::open(dir.path().to_path_buf(), 1, 1024, u64::MAX).await;
        assert!(matches!(
            result,
            Err(LoadError::DiskCacheUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir).await;

        commit_entry(&cache, "a", b"first version").await;
        commit_entry(&cache, "a", b"second").await;

        assert_eq!(cache.get(&key("a")).await.unwrap(), b"second");
        assert_eq!(cache.size_bytes(), 6);
    }
}
