//! Fixture backend replaying recorded responses.
//!
//! Responses are handed out in the order the requests arrive. Every request
//! is kept so it can be printed afterwards.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use quarry_core::{BackendError, ConfigError, DownloadChunk, Request, Response};
use quarry_engine::SearchBackend;
use std::collections::VecDeque;
use std::path::Path;

pub struct FixtureBackend {
    responses: Mutex<VecDeque<Response>>,
    requests: Mutex<Vec<Request>>,
}

impl FixtureBackend {
    pub fn new(responses: Vec<Response>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load one response per JSON file.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let responses = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                serde_json::from_str(&text)
                    .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
            })
            .collect::<Result<Vec<Response>, _>>()?;
        tracing::info!("Loaded {} fixture response(s)", responses.len());
        Ok(Self::new(responses))
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

impl SearchBackend for FixtureBackend {
    fn search(&self, request: Request) -> BoxFuture<'static, Result<Response, BackendError>> {
        self.requests.lock().push(request);
        let next = self.responses.lock().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| BackendError::Transport("no fixture response left".to_string()))
        })
    }

    fn download(&self, request: Request) -> BoxFuture<'static, Result<DownloadChunk, BackendError>> {
        self.requests.lock().push(request);
        Box::pin(async {
            Err(BackendError::Transport(
                "downloads are not replayed by fixtures".to_string(),
            ))
        })
    }

    fn download_next(
        &self,
        _scroll_id: String,
    ) -> BoxFuture<'static, Result<DownloadChunk, BackendError>> {
        Box::pin(async {
            Err(BackendError::Transport(
                "downloads are not replayed by fixtures".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_replays_in_order() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        write!(first, r#"{{"hits":{{"hits":[],"total":3}}}}"#).unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        write!(second, r#"{{"hits":{{"hits":[],"total":{{"value":7}}}}}}"#).unwrap();

        let backend = FixtureBackend::from_files(&[first.path(), second.path()]).unwrap();
        assert_eq!(backend.remaining(), 2);

        let a = backend.search(Request::default()).await.unwrap();
        let b = backend.search(Request::default()).await.unwrap();
        assert_eq!(a.hits.total.value(), 3);
        assert_eq!(b.hits.total.value(), 7);
        assert!(matches!(
            backend.search(Request::default()).await,
            Err(BackendError::Transport(_))
        ));
        assert_eq!(backend.requests().len(), 3);
    }

    #[test]
    fn test_bad_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            FixtureBackend::from_files(&[file.path()]),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            FixtureBackend::from_files(&[Path::new("/nonexistent/response.json")]),
            Err(ConfigError::Io { .. })
        ));
    }
}
