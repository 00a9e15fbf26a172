//! Command-line arguments.
//!
//! Every option is optional so that values from `--config` survive unless
//! given on the command line. The underscore spellings are accepted as
//! aliases for existing automation.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Parser, Debug, Default)]
#[command(name = "stakeprobe")]
#[command(about = "Staking lifecycle and API regression tests for Harmony networks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// TOML config file; command-line values take precedence
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Collection directory holding test.json, global.json and env.json
    #[arg(long, value_name = "DIR", alias = "test_dir")]
    pub test_dir: Option<PathBuf>,

    /// Attempts for a successful collection run
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Minimum epoch before the tests start
    #[arg(long, alias = "start_epoch")]
    pub start_epoch: Option<u64>,

    /// Source endpoint of the cross-shard transaction
    #[arg(long = "rpc-endpoint-src", value_name = "URL", alias = "rpc_endpoint_src")]
    pub endpoint_src: Option<String>,

    /// Destination endpoint of the cross-shard transaction
    #[arg(long = "rpc-endpoint-dst", value_name = "URL", alias = "rpc_endpoint_dst")]
    pub endpoint_dst: Option<String>,

    /// Source shard; derived from the source endpoint when absent
    #[arg(long, alias = "src_shard")]
    pub src_shard: Option<u32>,

    /// Destination shard; derived from the destination endpoint when absent
    #[arg(long, alias = "dst_shard")]
    pub dst_shard: Option<u32>,

    /// Explorer endpoint
    #[arg(long, value_name = "URL", alias = "exp_endpoint")]
    pub exp_endpoint: Option<String>,

    /// Seconds to wait before checking that a transaction landed
    #[arg(long, value_name = "SECONDS")]
    pub delay: Option<u64>,

    /// Chain ID passed to the wallet CLI
    #[arg(long, alias = "chain_id")]
    pub chain_id: Option<String>,

    /// Path of the wallet CLI binary
    #[arg(long, value_name = "PATH", alias = "cli_path")]
    pub cli_path: Option<PathBuf>,

    /// Passphrase unlocking the keystore
    #[arg(long, env = "STAKEPROBE_PASSPHRASE", alias = "cli_passphrase", hide_env_values = true)]
    pub cli_passphrase: Option<String>,

    /// Keystore directory to import funding accounts from
    #[arg(long, value_name = "DIR")]
    pub keystore: Option<PathBuf>,

    /// Keystore directory of the wallet CLI
    #[arg(long, value_name = "DIR")]
    pub wallet_keystore: Option<PathBuf>,

    /// Absolute directory for generated BLS key files
    #[arg(long, value_name = "DIR")]
    pub bls_key_dir: Option<PathBuf>,

    /// Validators to create
    #[arg(long)]
    pub validator_count: Option<usize>,

    /// BLS keys registered per validator
    #[arg(long)]
    pub bls_keys_per_validator: Option<usize>,

    /// Seed of the random draws, for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Also submit collect-rewards for every delegator
    #[arg(long)]
    pub collect_rewards: bool,

    /// Disable the regression tests
    #[arg(long, alias = "ignore_regression_test")]
    pub ignore_regression_test: bool,

    /// Disable the staking tests
    #[arg(long, alias = "ignore_staking_test")]
    pub ignore_staking_test: bool,

    /// Log filter (e.g. `info`, `stakeprobe_core=debug`)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}
