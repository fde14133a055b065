//! Error types for resource loading.

use thiserror::Error;

/// Error type for every loading operation in this crate.
///
/// Configuration errors are returned synchronously before any request is
/// issued. Every other variant aborts the session it occurred in.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Malformed manifest or configuration. Always a caller bug.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A request failed at the transport level (bad status, element error, ...).
    #[error("error loading resource \"{name}\": {message}")]
    Transport { name: String, message: String },

    /// A parser hook of a request returned an error.
    #[error("parser for resource \"{name}\" failed: {source}")]
    Parser {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The session was aborted because another resource failed.
    #[error("resource \"{0}\" was canceled")]
    Canceled(String),

    /// An image payload could not be decoded.
    #[error("could not decode image \"{name}\": {source}")]
    Decode {
        name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn transport(name: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;
