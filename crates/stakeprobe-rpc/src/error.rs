//! RPC error types.

use thiserror::Error;

/// RPC result type.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors raised while talking to a shard endpoint.
#[derive(Debug, Error, Clone)]
pub enum RpcError {
    /// Connection refused, timeout, non-HTTP response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Body is not the JSON-RPC shape we expect
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },

    /// Requested shard number is not part of the sharding structure
    #[error("Shard {requested} out of range ({available} shards)")]
    ShardOutOfRange { requested: usize, available: usize },
}

impl RpcError {
    /// Whether a later retry of the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Malformed(_))
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        RpcError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::ShardOutOfRange {
            requested: 4,
            available: 2,
        };
        assert_eq!(err.to_string(), "Shard 4 out of range (2 shards)");
        assert!(!err.is_transient());
        assert!(RpcError::Transport("refused".into()).is_transient());
    }
}
