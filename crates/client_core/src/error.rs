use shared::protocol::EnvelopeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("broadcast transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("server_url must start with http:// or https://, got {0}")]
    UnsupportedScheme(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server responded {status}: {message}")]
    Status { status: u16, message: String },
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
