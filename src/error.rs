//! Error types for delve.

use thiserror::Error;

use crate::document::DocumentError;
use crate::forms::FormError;
use crate::http::TransportError;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-retryable transport failure (bad request, TLS, body read, ...).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Transient failures kept happening after every allowed retry.
    #[error("giving up on {url} after {retries} retries: {source}")]
    RetriesExhausted {
        url: String,
        retries: u32,
        #[source]
        source: TransportError,
    },

    /// No registered parser accepts the response content type.
    #[error("couldn't fit parser for content type '{content_type}'")]
    NoParser { content_type: String },

    /// A history operation was called on a session with history turned off.
    #[error("session history is off")]
    HistoryDisabled,

    /// `back`/`forward` would leave the stored history.
    #[error("out of history boundaries: cursor {cursor}, target {target}, {len} entries stored")]
    HistoryBoundary {
        cursor: usize,
        target: isize,
        len: usize,
    },

    /// The operation needs a loaded page and none is open yet.
    #[error("no page has been opened yet")]
    NoPage,

    /// Invalid session configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Form field access or assignment failed.
    #[error(transparent)]
    Form(#[from] FormError),

    /// Document query failed.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Filesystem error while downloading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A download could not produce a local file.
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },
}

impl Error {
    /// Whether the failure is a transient transport condition worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(e) if e.is_transient())
    }
}
