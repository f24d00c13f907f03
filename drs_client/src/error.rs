use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DrsClientError {
    #[error("Request middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("object {object_id} not found on {hostname}")]
    ObjectNotFound { hostname: String, object_id: String },

    #[error("no download URL returned for object {0}")]
    MissingDownloadUrl(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("unexpected HTTP status: {0}")]
    UnexpectedHttpStatus(http::StatusCode),

    #[error("content length mismatch: expected {expected} bytes, wrote {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },
}

pub type Result<T> = std::result::Result<T, DrsClientError>;
