//! HTTP implementation of the remote fetch port.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::RemoteFetch;

/// Fetches image bytes over HTTP(S) with a configured timeout.
///
/// The response body is collected in full; reqwest closes the connection
/// on every exit path, including decode failures further down the chain.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given request timeout.
    ///
    /// # Errors
    /// Returns [`LoadError::NetworkFetchFailed`] if the HTTP client cannot
    /// be constructed.
    pub fn new(timeout: Duration) -> LoadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl RemoteFetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> LoadResult<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::network(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LoadError::network(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoadError::network(format!("failed to read body: {e}")))?;

        debug!(url = %url, size = bytes.len(), "Downloaded image bytes");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_construction() {
        assert!(HttpFetcher::new(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_maps_to_network_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(200)).unwrap();
        let result = fetcher.fetch("http://127.0.0.1:1/never").await;
        assert!(matches!(result, Err(LoadError::NetworkFetchFailed { .. })));
    }
}
