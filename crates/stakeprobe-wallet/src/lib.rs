//! stakeprobe wallet - bridge to the external `hmy` wallet CLI.
//!
//! Single-shot calls run the binary to completion and capture its output.
//! Calls that prompt (key creation, BLS key unlocking) run as an interactive
//! [`Session`] driven by an explicit [`Protocol`] of expect/send steps.

pub mod error;
pub mod protocol;
pub mod response;
pub mod runner;
pub mod session;
pub mod wallet;

pub use error::{Result, WalletError};
pub use protocol::{Prompt, Protocol, Step};
pub use response::{
    parse_cli_version, parse_json_output, parse_transaction_response, ShardBalance,
    TransactionResponse,
};
pub use runner::{render_command, CommandOutput, CommandRunner, ProcessRunner};
pub use session::Session;
pub use wallet::{
    CreateValidatorRequest, EditValidatorRequest, TransferRequest, ValidatorDescription, Wallet,
    WalletSettings, MIN_CLI_VERSION,
};
