//! Error types for the request pipeline.
//!
//! Only configuration and encoding problems are reported as `Err`. Anything
//! that goes wrong on the wire (connect failures, timeouts, I/O errors) is
//! captured in the [`Receiver`](crate::receiver::Receiver) instead, so the
//! blocking and non-blocking paths share one failure representation.

/// Raised when a request body cannot be encoded. Always raised before any I/O.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("multipart body requires at least one part")]
    EmptyMultipart,
}

/// Caller-side errors detected while finalizing a [`Sender`](crate::Sender).
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Cannot serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Transport runtime unavailable: {0}")]
    Runtime(String),
}

/// A [`BodyHandler`](crate::receiver::BodyHandler) could not decode a response payload.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("Response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Resolution failures of a [`ResponseHandle`](crate::net::ResponseHandle).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("request was cancelled")]
    Cancelled,

    #[error("request task ended without a result")]
    Lost,
}
