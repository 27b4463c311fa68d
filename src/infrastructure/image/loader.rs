//! Async image loading orchestrator.
//!
//! Resolves a resource identifier through a three-tier chain, memory then
//! disk then network, and hands completed results to the dispatcher. The
//! memory probe runs synchronously on the binding caller's context; all
//! disk, network, and decode work runs on a bounded worker pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, trace, warn};

use crate::domain::entities::{
    BindRequest, CacheKey, DecodedImage, ImageSource, LoadedImage, LoaderResult, ResourceId,
};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{DisplayTarget, RemoteFetch};
use crate::infrastructure::config::LoaderConfig;

use super::decoder;
use super::disk_cache::DiskCache;
use super::dispatcher::{self, ResultDispatcher};
use super::memory_cache::{CacheStats, MemoryCache};

/// Process-scoped image loading pipeline.
///
/// Construct one per application and share it by reference; the worker
/// pool and both caches live as long as the loader.
pub struct ImageLoader {
    context: Arc<LoaderContext>,
    job_tx: mpsc::UnboundedSender<LoaderJob>,
}

#[derive(Debug)]
enum LoaderJob {
    Bind(BindRequest),
    Prefetch {
        id: ResourceId,
        req_width: u32,
        req_height: u32,
    },
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("disk_cache", &self.context.disk_cache)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader, opening the disk cache per `config`.
    ///
    /// A disk cache that fails to open (insufficient free space, bad
    /// directory) is not fatal: the loader logs once and runs in
    /// memory+network-only mode.
    pub async fn new(config: &LoaderConfig, fetcher: Arc<dyn RemoteFetch>) -> Self {
        let disk_cache = match DiskCache::open(
            config.effective_cache_dir(),
            config.cache_version,
            config.disk_capacity,
            config.min_free_space,
        )
        .await
        {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(error = %e, "Disk cache unavailable, degrading to memory+network-only mode");
                None
            }
        };

        let memory_cache = MemoryCache::new(config.memory_budget);
        Self::with_parts(config, memory_cache, disk_cache, fetcher)
    }

    /// Assembles a loader from explicit parts.
    ///
    /// Spawns the worker orchestration loop and the delivery loop; both
    /// run for the process lifetime.
    #[must_use]
    pub fn with_parts(
        config: &LoaderConfig,
        memory_cache: MemoryCache<DecodedImage>,
        disk_cache: Option<DiskCache>,
        fetcher: Arc<dyn RemoteFetch>,
    ) -> Self {
        let context = Arc::new(LoaderContext {
            memory_cache,
            disk_cache,
            fetcher,
            dispatcher: ResultDispatcher::spawn(),
            pending_write_wait: config.pending_write_wait(),
        });

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(config.worker_limit()));
        tokio::spawn(run_worker_loop(context.clone(), job_rx, semaphore));

        Self { context, job_tx }
    }

    /// Binds a resource to a display target, fire and forget.
    ///
    /// Tags the target, probes the memory cache synchronously (no thread
    /// hop for already-resident images), and otherwise queues the load.
    /// Delivery always happens via the dispatcher; a failed load simply
    /// never delivers.
    pub fn bind(
        &self,
        id: ResourceId,
        target: Arc<dyn DisplayTarget>,
        req_width: u32,
        req_height: u32,
    ) {
        target.set_tag(id.clone());

        let key = CacheKey::derive(&id);
        if let Some(image) = self.context.memory_cache.get(&key) {
            trace!(id = %id, "Bind satisfied from memory on the caller's context");
            target.apply(image);
            return;
        }

        let request = BindRequest {
            id,
            target,
            req_width,
            req_height,
        };
        if let Err(e) = self.job_tx.send(LoaderJob::Bind(request)) {
            error!(error = %e, "Worker loop is gone, dropping bind request");
        }
    }

    /// Loads an image through the full chain without binding a target.
    ///
    /// # Errors
    /// Returns the first unrecoverable error in the chain; see
    /// [`LoadError`] for the taxonomy.
    pub async fn load(
        &self,
        id: &ResourceId,
        req_width: u32,
        req_height: u32,
    ) -> LoadResult<LoadedImage> {
        self.context.load(id, req_width, req_height).await
    }

    /// Warms the caches for a resource with no target and no delivery.
    pub fn prefetch(&self, id: ResourceId, req_width: u32, req_height: u32) {
        let job = LoaderJob::Prefetch {
            id,
            req_width,
            req_height,
        };
        if let Err(e) = self.job_tx.send(job) {
            error!(error = %e, "Worker loop is gone, dropping prefetch");
        }
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.context.memory_cache.stats()
    }

    /// False when the loader is running in memory+network-only mode.
    #[must_use]
    pub fn has_disk_cache(&self) -> bool {
        self.context.disk_cache.is_some()
    }
}

/// Pulls jobs into a backlog and spawns one task per job, bounded by the
/// semaphore. The backlog itself is unbounded.
async fn run_worker_loop(
    context: Arc<LoaderContext>,
    mut job_rx: mpsc::UnboundedReceiver<LoaderJob>,
    semaphore: Arc<Semaphore>,
) {
    let mut backlog: VecDeque<LoaderJob> = VecDeque::new();

    loop {
        tokio::select! {
            job = job_rx.recv() => {
                match job {
                    Some(job) => backlog.push_back(job),
                    None => break,
                }
            }
            Ok(permit) = semaphore.clone().acquire_owned(), if !backlog.is_empty() => {
                if let Some(job) = backlog.pop_front() {
                    let context = context.clone();
                    tokio::spawn(async move {
                        context.run(job).await;
                        drop(permit);
                    });
                }
            }
        }
    }
}

/// Shared state for load tasks.
struct LoaderContext {
    memory_cache: MemoryCache<DecodedImage>,
    disk_cache: Option<DiskCache>,
    fetcher: Arc<dyn RemoteFetch>,
    dispatcher: ResultDispatcher,
    pending_write_wait: Duration,
}

impl LoaderContext {
    async fn run(&self, job: LoaderJob) {
        match job {
            LoaderJob::Bind(request) => {
                match self.load(&request.id, request.req_width, request.req_height).await {
                    Ok(loaded) => self.dispatcher.dispatch(LoaderResult {
                        target: request.target,
                        id: loaded.id,
                        image: loaded.image,
                    }),
                    Err(e) => {
                        debug!(id = %request.id, error = %e, "Load failed, nothing delivered");
                    }
                }
            }
            LoaderJob::Prefetch {
                id,
                req_width,
                req_height,
            } => {
                if let Err(e) = self.load(&id, req_width, req_height).await {
                    debug!(id = %id, error = %e, "Prefetch failed");
                }
            }
        }
    }

    /// Memory, then disk, then network.
    async fn load(
        &self,
        id: &ResourceId,
        req_width: u32,
        req_height: u32,
    ) -> LoadResult<LoadedImage> {
        let key = CacheKey::derive(id);

        if let Some(image) = self.memory_cache.get(&key) {
            return Ok(LoadedImage {
                id: id.clone(),
                image,
                source: ImageSource::MemoryCache,
            });
        }

        if let Some(image) = self.load_from_disk(&key, req_width, req_height).await {
            return Ok(LoadedImage {
                id: id.clone(),
                image,
                source: ImageSource::DiskCache,
            });
        }

        self.load_from_network(id, &key, req_width, req_height).await
    }

    /// Reads and decodes a disk entry, populating the memory cache.
    ///
    /// A cached entry that fails to decode is treated as a miss so the
    /// chain falls through to a fresh network fetch.
    async fn load_from_disk(
        &self,
        key: &CacheKey,
        req_width: u32,
        req_height: u32,
    ) -> Option<Arc<DecodedImage>> {
        let disk = self.disk_cache.as_ref()?;
        let bytes = disk.get(key).await?;
        match decode_on_worker(bytes, req_width, req_height).await {
            Ok(image) => {
                self.memory_cache.put(key.clone(), image.clone());
                Some(image)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached entry failed to decode, treating as miss");
                None
            }
        }
    }

    /// Fetches over the network, persisting through the disk cache when
    /// one is available.
    async fn load_from_network(
        &self,
        id: &ResourceId,
        key: &CacheKey,
        req_width: u32,
        req_height: u32,
    ) -> LoadResult<LoadedImage> {
        dispatcher::assert_worker_context("network fetch");

        let Some(disk) = self.disk_cache.clone() else {
            // Memory+network-only mode: decode straight from the download.
            return self.fetch_direct(id, key, req_width, req_height).await;
        };

        match self.fetch_into_disk(&disk, id, key).await {
            Ok(()) => {
                debug!(id = %id, key = %key, "Downloaded and committed to disk cache");
                match self.load_from_disk(key, req_width, req_height).await {
                    Some(image) => Ok(LoadedImage {
                        id: id.clone(),
                        image,
                        source: ImageSource::Network,
                    }),
                    None => Err(LoadError::decode("entry unreadable after commit")),
                }
            }
            Err(LoadError::ConcurrentWriteConflict { .. }) => {
                trace!(key = %key, "Another load is fetching this key, waiting for its commit");
                if disk.await_pending_write(key, self.pending_write_wait).await
                    && let Some(image) = self.load_from_disk(key, req_width, req_height).await
                {
                    return Ok(LoadedImage {
                        id: id.clone(),
                        image,
                        source: ImageSource::DiskCache,
                    });
                }
                warn!(key = %key, "In-flight writer never published, degrading to direct fetch");
                self.fetch_direct(id, key, req_width, req_height).await
            }
            Err(e) => Err(e),
        }
    }

    /// Downloads a resource into the disk cache under an exclusive editor.
    async fn fetch_into_disk(
        &self,
        disk: &DiskCache,
        id: &ResourceId,
        key: &CacheKey,
    ) -> LoadResult<()> {
        let Some(mut editor) = disk.edit(key).await? else {
            return Err(LoadError::ConcurrentWriteConflict {
                key: key.to_string(),
            });
        };

        let bytes = match self.fetcher.fetch(id.as_str()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                editor.abort().await;
                return Err(e);
            }
        };
        if let Err(e) = editor.write_all(&bytes).await {
            editor.abort().await;
            return Err(e);
        }
        editor.commit().await
    }

    /// Download and decode without persisting, memory cache still
    /// populated.
    async fn fetch_direct(
        &self,
        id: &ResourceId,
        key: &CacheKey,
        req_width: u32,
        req_height: u32,
    ) -> LoadResult<LoadedImage> {
        let bytes = self.fetcher.fetch(id.as_str()).await?;
        let image = decode_on_worker(bytes, req_width, req_height).await?;
        self.memory_cache.put(key.clone(), image.clone());
        Ok(LoadedImage {
            id: id.clone(),
            image,
            source: ImageSource::Network,
        })
    }
}

/// Runs the CPU-bound decode on the blocking pool.
async fn decode_on_worker(
    bytes: impl AsRef<[u8]> + Send + 'static,
    req_width: u32,
    req_height: u32,
) -> LoadResult<Arc<DecodedImage>> {
    let image = tokio::task::spawn_blocking(move || {
        decoder::decode_bounded(bytes.as_ref(), req_width, req_height)
    })
    .await
    .map_err(|e| LoadError::decode(format!("decode task panicked: {e}")))??;
    Ok(Arc::new(image))
}
