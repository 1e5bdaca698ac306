use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Why a transfer stopped short of `Completed`.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot inspect destination: {0}")]
    LocalState(std::io::Error),

    #[error("server answered {status}")]
    UnexpectedStatus { status: StatusCode },

    #[error("malformed response header: {0}")]
    MalformedHeader(String),

    #[error("no response headers within {0:?}")]
    NegotiationTimeout(Duration),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("cannot write destination: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended at {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
}

impl TransferError {
    /// Whether running the same request again has a chance of getting further.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::UnexpectedStatus { status } => status.is_server_error(),
            TransferError::MalformedHeader(_) => false,
            TransferError::LocalState(_) | TransferError::Io(_) => false,
            TransferError::NegotiationTimeout(_)
            | TransferError::Network(_)
            | TransferError::LengthMismatch { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let e = TransferError::UnexpectedStatus { status: StatusCode::SERVICE_UNAVAILABLE };
        assert!(e.is_retryable());
        let e = TransferError::UnexpectedStatus { status: StatusCode::NOT_FOUND };
        assert!(!e.is_retryable());
        assert_eq!(e.to_string(), "server answered 404 Not Found");
    }

    #[test]
    fn short_stream_is_retryable() {
        let e = TransferError::LengthMismatch { expected: 10, actual: 4 };
        assert!(e.is_retryable());
    }
}
