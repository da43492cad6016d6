//! User-facing error notices.

/// Receives one notice per failed request.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Notifier that writes notices to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}
