use thiserror::Error;

/// Client-side exchange errors (§7 of the design — delivered to the response
/// handler exactly once, never panicked).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to resolve host")]
    ResolveHost,

    #[error("peer closed the connection before the response completed")]
    NoReply,

    #[error("malformed HTTP framing")]
    Invalid,

    #[error("request timed out")]
    Timeout,

    #[error("exchange aborted: client is shutting down")]
    Closing,

    #[error("connection pool has no TLS support configured")]
    TlsUnsupported,

    #[error("chunked transfer encoding is not supported")]
    ChunkedUnsupported,

    #[error("redirect response carried no usable Location header")]
    MissingLocation,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid URI: {0}")]
    InvalidUri(String),
}
