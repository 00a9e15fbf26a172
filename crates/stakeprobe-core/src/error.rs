use stakeprobe_rpc::RpcError;
use stakeprobe_wallet::WalletError;
use thiserror::Error;

use crate::workflow::Stage;

/// On-chain state that disagrees with the reference model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    #[error("validator {validator} is not in the validator pool")]
    NotInPool { validator: String },

    #[error("{subject}: `{field}` is missing or malformed")]
    MissingField { subject: String, field: String },

    #[error("{subject}: `{field}` expected {expected}, observed {observed}")]
    Field {
        subject: String,
        field: String,
        expected: String,
        observed: String,
    },

    #[error("validator {validator} has no self-delegation")]
    NoSelfDelegation { validator: String },

    #[error("validator {validator} has {count} self-delegations, expected exactly one")]
    DuplicateSelfDelegation { validator: String, count: usize },

    #[error("expected exactly one delegation from {delegator} to {validator}, found {found}")]
    DelegationCount {
        delegator: String,
        validator: String,
        found: usize,
    },

    #[error("undelegation epoch {observed} is more than one epoch from issuance epoch {issued}")]
    UndelegationEpoch { issued: u64, observed: u64 },
}

impl Mismatch {
    /// Name of the failing field.
    pub fn field(&self) -> &str {
        match self {
            Mismatch::NotInPool { .. } => "validator_pool",
            Mismatch::MissingField { field, .. } | Mismatch::Field { field, .. } => field.as_str(),
            Mismatch::NoSelfDelegation { .. } | Mismatch::DuplicateSelfDelegation { .. } => {
                "self_delegation"
            }
            Mismatch::DelegationCount { .. } => "delegations",
            Mismatch::UndelegationEpoch { .. } => "undelegation_epoch",
        }
    }
}

/// Workflow failures. All of them abort the run.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("`{operation}` cannot run in stage {stage:?}")]
    OutOfOrder { operation: &'static str, stage: Stage },

    #[error("None of the loaded accounts have more than {required} on shard {shard}")]
    InsufficientFunds { required: f64, shard: u32 },

    #[error("Must load at least 2 keys from the keystore directory, loaded {loaded}")]
    NotEnoughAccounts { loaded: usize },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for WorkflowError {
    fn from(e: std::io::Error) -> Self {
        WorkflowError::Io(e.to_string())
    }
}

/// Workflow result type.
pub type Result<T> = std::result::Result<T, WorkflowError>;
