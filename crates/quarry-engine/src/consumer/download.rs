//! Bulk download: chunked export polled one request at a time.

use quarry_core::{BackendError, DownloadChunk, DownloadConfig, Request, Response, SourceConfig};
use tokio::sync::watch;

use super::{Consumer, ConsumerKind};
use crate::backend::SearchBackend;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Idle,
    Running,
    Complete { filename: Option<String> },
    Failed(String),
}

/// Progress broadcast while a download runs.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub done: u64,
    pub total: u64,
    pub state: DownloadState,
}

impl DownloadProgress {
    fn idle() -> Self {
        Self {
            done: 0,
            total: 0,
            state: DownloadState::Idle,
        }
    }

    /// Whole percent written, 0 when the total is unknown.
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        (self.done.min(self.total) * 100) / self.total
    }
}

pub struct DownloadConsumer {
    config: DownloadConfig,
    tx: watch::Sender<DownloadProgress>,
    rx: watch::Receiver<DownloadProgress>,
}

impl DownloadConsumer {
    pub fn new(config: DownloadConfig) -> Self {
        let (tx, rx) = watch::channel(DownloadProgress::idle());
        Self { config, tx, rx }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.rx.clone()
    }

    pub fn progress(&self) -> DownloadProgress {
        self.rx.borrow().clone()
    }

    /// Run a download to completion.
    ///
    /// Each chunk names the scroll id of the next, so chunks are requested
    /// strictly one after another.
    pub async fn run(
        &self,
        backend: &dyn SearchBackend,
        request: Request,
    ) -> EngineResult<DownloadChunk> {
        let started = self.tx.send_if_modified(|progress| {
            if progress.state == DownloadState::Running {
                return false;
            }
            *progress = DownloadProgress {
                done: 0,
                total: 0,
                state: DownloadState::Running,
            };
            true
        });
        if !started {
            return Err(EngineError::DownloadInProgress(self.config.id.clone()));
        }
        tracing::info!("Download '{}' started", self.config.id);

        let mut chunk = backend.download(request).await.map_err(|e| self.fail(e.into()))?;
        loop {
            if let Err(e) = check_chunk(&chunk) {
                return Err(self.fail(e.into()));
            }
            self.tx.send_modify(|progress| {
                progress.done = chunk.done;
                progress.total = chunk.total;
            });
            tracing::debug!(
                "Download '{}': {} of {}",
                self.config.id,
                chunk.done,
                chunk.total
            );
            if chunk.is_complete() {
                break;
            }
            let Some(scroll_id) = chunk.scroll_id.clone() else {
                return Err(self.fail(EngineError::DownloadStalled(self.config.id.clone())));
            };
            chunk = backend
                .download_next(scroll_id)
                .await
                .map_err(|e| self.fail(e.into()))?;
        }

        let filename = chunk.filename.clone();
        tracing::info!("Download '{}' complete: {:?}", self.config.id, filename);
        self.tx.send_modify(|progress| {
            progress.state = DownloadState::Complete { filename };
        });
        Ok(chunk)
    }

    fn fail(&self, error: EngineError) -> EngineError {
        tracing::error!("Download '{}' failed: {}", self.config.id, error);
        let message = error.to_string();
        self.tx.send_modify(|progress| {
            progress.state = DownloadState::Failed(message);
        });
        error
    }
}

fn check_chunk(chunk: &DownloadChunk) -> Result<(), BackendError> {
    match chunk.code {
        Some(401) => Err(BackendError::Unauthorized),
        Some(code) if code != 200 => Err(BackendError::Query {
            code: Some(code),
            message: "download request failed".to_string(),
        }),
        _ => Ok(()),
    }
}

impl Consumer for DownloadConsumer {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Download
    }

    fn panel(&self) -> Option<String> {
        self.config.panel.clone()
    }

    /// Downloads only fetch on request.
    fn needs_population(&self, _source: &str) -> bool {
        false
    }

    fn populate(&self, _settings: &SourceConfig, _response: &Response, _request: &Request) {}
}
