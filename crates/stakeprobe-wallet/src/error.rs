//! Error types for the wallet bridge.

use std::time::Duration;
use thiserror::Error;

/// Wallet bridge result type.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Wallet bridge errors.
#[derive(Error, Debug, Clone)]
pub enum WalletError {
    /// The wallet binary could not be started
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The command exited unsuccessfully
    #[error("Command `{command}` failed ({status}): {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    /// No matching output within the allowed time
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        timeout: Duration,
        output: String,
    },

    /// Output ended before the expected prompt appeared
    #[error("Output ended while waiting for {waiting_for}; output so far: {output:?}")]
    UnexpectedEof { waiting_for: String, output: String },

    /// I/O failure on the child's pipes or the keystore
    #[error("I/O error: {0}")]
    Io(String),

    /// Output that should be JSON is not
    #[error("Could not parse wallet output as JSON ({reason}): {output:?}")]
    InvalidJson { reason: String, output: String },

    /// A transaction was submitted but no receipt came back
    #[error("Transaction response has no transaction-receipt: {0}")]
    MissingReceipt(String),

    /// Output shape not recognized (usually a CLI version mismatch)
    #[error("Unexpected wallet output: {0}")]
    UnexpectedOutput(String),

    /// A query answered with a null `result`
    #[error("`{command}` returned no result")]
    EmptyResult { command: String },

    /// No keystore entry under that name
    #[error("Unknown account: {0}")]
    UnknownAccount(String),
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::Io(e.to_string())
    }
}
