//! Error types shared by all Quarry crates.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Backend errors - surfaced to the user once per failed request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Network or proxy transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with an error payload or a non-200 code.
    #[error("Search query failed (code {code:?}): {message}")]
    Query { code: Option<u16>, message: String },

    /// Backend credentials rejected (code 401).
    #[error("Backend rejected the configured credentials")]
    Unauthorized,

    /// Request did not complete in time.
    #[error("Backend timeout after {duration:?}")]
    Timeout { duration: Duration },
}

/// Configuration errors.
///
/// Raised while loading a page file or wiring widgets. A widget whose
/// configuration is invalid is skipped; its siblings keep working.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config directory found.
    #[error("Config directory not found")]
    NoConfigDir,

    /// IO error.
    #[error("IO error reading {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A required setting is absent.
    #[error("Widget '{widget}' is missing required setting '{setting}'")]
    MissingSetting { widget: String, setting: String },

    /// A setting points at a widget that does not exist or has the wrong type.
    #[error("Widget '{widget}' refers to unknown {kind} '{target}'")]
    UnknownReference {
        widget: String,
        kind: &'static str,
        target: String,
    },

    /// An aggregation slot pointer does not resolve inside the template.
    #[error("Aggregation slot '{slot}' of source '{source_id}' does not resolve: {pointer}")]
    InvalidSlot {
        source_id: String,
        slot: &'static str,
        pointer: String,
    },

    /// Two widgets share an id.
    #[error("Duplicate widget id '{0}'")]
    DuplicateId(String),
}
