//! Search backend seam.
//!
//! The engine never talks HTTP itself. A `SearchBackend` takes a finished
//! request and returns a future, so hosts can plug in a proxy client and tests
//! can plug in mocks.
//!
//! ## Timeouts
//!
//! `TimeoutBackend` wraps any backend and fails requests that take longer
//! than the configured duration with `BackendError::Timeout`.

use futures::future::BoxFuture;
use quarry_core::{BackendError, DownloadChunk, Request, Response};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Backend Trait
// =============================================================================

/// Trait for search proxy operations.
#[cfg_attr(test, mockall::automock)]
pub trait SearchBackend: Send + Sync {
    /// Run a search request.
    fn search(&self, request: Request) -> BoxFuture<'static, Result<Response, BackendError>>;

    /// Start a bulk download. Returns the first chunk.
    fn download(&self, request: Request) -> BoxFuture<'static, Result<DownloadChunk, BackendError>>;

    /// Continue a bulk download from a scroll id.
    fn download_next(
        &self,
        scroll_id: String,
    ) -> BoxFuture<'static, Result<DownloadChunk, BackendError>>;
}

impl<B: SearchBackend + ?Sized> SearchBackend for Arc<B> {
    fn search(&self, request: Request) -> BoxFuture<'static, Result<Response, BackendError>> {
        (**self).search(request)
    }

    fn download(&self, request: Request) -> BoxFuture<'static, Result<DownloadChunk, BackendError>> {
        (**self).download(request)
    }

    fn download_next(
        &self,
        scroll_id: String,
    ) -> BoxFuture<'static, Result<DownloadChunk, BackendError>> {
        (**self).download_next(scroll_id)
    }
}

// =============================================================================
// Timeout Wrapper
// =============================================================================

/// Backend wrapper enforcing a per-request timeout.
pub struct TimeoutBackend<B> {
    inner: B,
    timeout: Duration,
}

impl<B: SearchBackend> TimeoutBackend<B> {
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

fn with_timeout<T, F>(duration: Duration, future: F) -> BoxFuture<'static, Result<T, BackendError>>
where
    T: Send + 'static,
    F: Future<Output = Result<T, BackendError>> + Send + 'static,
{
    Box::pin(async move {
        match tokio::time::timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Backend request timed out after {:?}", duration);
                Err(BackendError::Timeout { duration })
            }
        }
    })
}

impl<B: SearchBackend> SearchBackend for TimeoutBackend<B> {
    fn search(&self, request: Request) -> BoxFuture<'static, Result<Response, BackendError>> {
        with_timeout(self.timeout, self.inner.search(request))
    }

    fn download(&self, request: Request) -> BoxFuture<'static, Result<DownloadChunk, BackendError>> {
        with_timeout(self.timeout, self.inner.download(request))
    }

    fn download_next(
        &self,
        scroll_id: String,
    ) -> BoxFuture<'static, Result<DownloadChunk, BackendError>> {
        with_timeout(self.timeout, self.inner.download_next(scroll_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_backend_times_out() {
        let mut mock = MockSearchBackend::new();
        mock.expect_search().returning(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Response::default())
            })
        });

        let backend = TimeoutBackend::new(mock, Duration::from_millis(20));
        let result = backend.search(Request::default()).await;
        assert_eq!(
            result,
            Err(BackendError::Timeout {
                duration: Duration::from_millis(20)
            })
        );
    }

    #[tokio::test]
    async fn test_timeout_backend_passes_through() {
        let mut mock = MockSearchBackend::new();
        mock.expect_download_next()
            .withf(|id| id == "scroll-1")
            .returning(|_| {
                Box::pin(async {
                    Ok(DownloadChunk {
                        done: 10,
                        total: 10,
                        ..Default::default()
                    })
                })
            });

        let backend = TimeoutBackend::new(mock, Duration::from_secs(1));
        let chunk = backend.download_next("scroll-1".to_string()).await.unwrap();
        assert!(chunk.is_complete());
    }
}
