use std::path::PathBuf;

/// Failures of the byte connection or of HTTP framing on top of it.
///
/// None of these are fatal: the lifecycle recovers from all of them by
/// resetting the link on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection is not established")]
    NotConnected,

    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("tls: {0}")]
    Tls(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by remote")]
    Closed,

    #[error("malformed http response: {0}")]
    Malformed(String),

    #[error("response body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

/// Protocol-level failures found while decoding a server payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server replied ok=false (code {code:?}): {description}")]
    NotOk {
        code: Option<i64>,
        description: String,
    },

    #[error("reply has no result")]
    MissingResult,

    #[error("field `{field}` is missing or has the wrong type")]
    Schema { field: &'static str },
}

/// Failures of a multipart upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("command slot is busy")]
    Busy,

    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("connection is not established")]
    NotConnected,

    #[error("reading upload source failed: {0}")]
    Source(std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("upload rejected: {0}")]
    Rejected(#[from] DecodeError),
}
