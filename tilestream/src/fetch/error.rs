//! Fetch failure taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Why a tile could not be delivered.
///
/// Every variant is reported to the tile's channel as an `Error` state;
/// none of them is retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Connection, TLS or body-read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request did not finish within its timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The resource URL could not be built or parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The payload arrived but its channel refused it.
    #[error("Rejected payload: {0}")]
    InvalidPayload(String),
}

impl FetchError {
    /// Whether the failure came from the network rather than the payload.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FetchError::Http { .. } | FetchError::Transport(_) | FetchError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_status() {
        let err = FetchError::Http {
            status: 404,
            url: "https://tiles.example.com/1/0/0.png".into(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 404 from https://tiles.example.com/1/0/0.png"
        );
    }

    #[test]
    fn test_network_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_network());
        assert!(FetchError::Transport("reset".into()).is_network());
        assert!(!FetchError::InvalidPayload("empty".into()).is_network());
        assert!(!FetchError::InvalidUrl("x".into()).is_network());
    }
}
