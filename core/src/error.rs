//! Error types for the fetch coordinator.
//!
//! # Design
//! Callers mostly need to tell three things apart: the operation was
//! cancelled (`Abort`), the exchange failed somewhere below us (`Fetch` with
//! kind `system`), or the request was never valid to begin with (scheme, URL,
//! header, data URI). The first two carry their own types so they can be
//! matched and tagged the way WHATWG-style clients expect; the rest are plain
//! variants on [`Error`].
//!
//! `Error` is `Clone`: one abort error is handed to the caller and also used
//! as the destroy cause of the outbound body stream.

use std::fmt;

use thiserror::Error;

/// Message carried by every [`AbortError`].
pub const ABORT_MESSAGE: &str = "The operation was aborted.";

/// Errors returned by [`Client::fetch`](crate::Client::fetch) and by the
/// request/response value objects.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Abort(#[from] AbortError),

    /// The URL scheme is not one of `data`, `http`, `https`.
    #[error("cannot load {url}: URL scheme \"{scheme}\" is not supported")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("invalid URL {input:?}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Abort(_))
    }

    /// The WHATWG-style type tag: `aborted`, a [`FetchError`] kind, or
    /// `type-error` for requests rejected before dispatch.
    pub fn tag(&self) -> &'static str {
        match self {
            Error::Fetch(e) => e.kind().as_str(),
            Error::Abort(_) => AbortError::TAG,
            _ => "type-error",
        }
    }
}

/// Category of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport or the HTTP exchange failed.
    System,
    /// The response body exceeded the request's `size` limit.
    MaxSize,
    /// The response body was not valid JSON.
    InvalidJson,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::System => "system",
            ErrorKind::MaxSize => "max-size",
            ErrorKind::InvalidJson => "invalid-json",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure of the exchange or of reading its body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    kind: ErrorKind,
    cause: Option<String>,
}

impl FetchError {
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            cause: None,
        }
    }

    /// A `system` error wrapping a lower-level detail.
    pub fn system(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::System,
            cause: Some(cause.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The raw detail reported by the layer that failed, if any.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

/// The operation was cancelled through its [`AbortSignal`](crate::AbortSignal).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AbortError {
    message: String,
}

impl AbortError {
    pub const TAG: &'static str = "aborted";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for AbortError {
    fn default() -> Self {
        Self::new(ABORT_MESSAGE)
    }
}
