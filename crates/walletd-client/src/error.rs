//! Client error type.

use walletd_core::config::ConfigError;
use walletd_core::errors::{MappedError, RequestError};
use walletd_core::spec::SpecError;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The daemon could not be reached (refused, reset, timed out).
    #[error("cannot connect to daemon at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },
    /// The daemon answered with an error code listed in its spec document.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The daemon answered with an error code it never documented.
    #[error("server returned error: {message} (code {code})")]
    UnknownServer { code: i64, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("daemon returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid spec document: {0}")]
    Spec(#[from] SpecError),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("method name '{0}' is empty or reserved")]
    InvalidMethod(String),
    #[error("operation interrupted")]
    Interrupted,
    #[error("blocking call on a thread driving a current-thread runtime; use the async client")]
    WouldBlock,
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("client is closed")]
    Closed,
}

impl From<MappedError> for ClientError {
    fn from(err: MappedError) -> Self {
        match err {
            MappedError::Known(err) => ClientError::Request(err),
            MappedError::Unknown { code, message } => ClientError::UnknownServer { code, message },
        }
    }
}

impl ClientError {
    /// True for errors the daemon reported with the given kind name.
    pub fn is_kind(&self, name: &str) -> bool {
        matches!(self, ClientError::Request(err) if err.is(name))
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use walletd_core::errors::{ErrorMapper, KindRegistry};
    use walletd_core::spec::SpecDocument;

    #[test]
    fn mapped_errors_convert() {
        let registry = KindRegistry::new();
        let mapper = ErrorMapper::with_registry(&registry);
        let spec = SpecDocument::default();

        let known: ClientError = mapper.map(&spec, -32600, "raw").into();
        assert!(known.is_kind("UnauthorizedError"));
        assert_eq!(known.to_string(), "UnauthorizedError: Unauthorized");

        let unknown: ClientError = mapper.map(&spec, -1, "boom").into();
        assert!(matches!(
            unknown,
            ClientError::UnknownServer { code: -1, ref message } if message == "boom"
        ));
        assert!(!unknown.is_kind("UnauthorizedError"));
    }
}
