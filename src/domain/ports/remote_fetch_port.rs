//! Port definition for remote image fetching.

use bytes::Bytes;

use crate::domain::errors::LoadResult;

/// Downloads raw encoded image bytes from a remote identifier.
///
/// Implementations must close the connection deterministically on all exit
/// paths and must never be invoked on the delivery context.
#[async_trait::async_trait]
pub trait RemoteFetch: Send + Sync {
    /// Fetches the full body for a URL.
    ///
    /// # Errors
    /// Returns [`LoadError::NetworkFetchFailed`](crate::domain::errors::LoadError)
    /// on connection, status, or stream errors.
    async fn fetch(&self, url: &str) -> LoadResult<Bytes>;
}
