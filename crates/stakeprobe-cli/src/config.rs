//! Run configuration.
//!
//! Defaults, optionally overlaid by a TOML file, then by command-line
//! arguments.

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use stakeprobe_core::WorkflowSettings;
use stakeprobe_rpc::shard_from_endpoint;
use stakeprobe_wallet::WalletSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::args::Args;

/// Run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Collection directory
    pub test_dir: PathBuf,
    /// Attempts for a successful collection run
    pub iterations: u32,
    /// Minimum epoch before the tests start
    pub start_epoch: u64,
    pub endpoint_src: String,
    pub endpoint_dst: String,
    pub src_shard: Option<u32>,
    pub dst_shard: Option<u32>,
    pub exp_endpoint: String,
    /// Finality delay (seconds)
    pub delay: u64,
    pub chain_id: String,
    /// Wallet CLI binary, looked up on `PATH` when it is a bare name
    pub cli_path: PathBuf,
    pub passphrase: String,
    /// Directory of keystores to import as funding accounts
    pub keystore: PathBuf,
    /// Keystore directory of the wallet CLI
    pub wallet_keystore: PathBuf,
    pub bls_key_dir: PathBuf,
    pub validator_count: usize,
    pub bls_keys_per_validator: usize,
    pub seed: Option<u64>,
    pub collect_rewards: bool,
    pub ignore_regression_test: bool,
    pub ignore_staking_test: bool,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            test_dir: PathBuf::from("./tests/default"),
            iterations: 5,
            start_epoch: 1,
            endpoint_src: "https://api.s0.b.hmny.io/".to_string(),
            endpoint_dst: "https://api.s1.b.hmny.io/".to_string(),
            src_shard: None,
            dst_shard: None,
            exp_endpoint: "http://e0.b.hmny.io:5000/".to_string(),
            delay: 45,
            chain_id: "testnet".to_string(),
            cli_path: PathBuf::from("hmy"),
            passphrase: String::new(),
            keystore: PathBuf::from("TestnetValidatorKeys"),
            wallet_keystore: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".hmy_cli")
                .join("account-keys"),
            bls_key_dir: std::env::temp_dir(),
            validator_count: 1,
            bls_keys_per_validator: 1,
            seed: None,
            collect_rewards: false,
            ignore_regression_test: false,
            ignore_staking_test: false,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ProbeConfig {
    /// Defaults, overlaid by `--config` if given, then by `args`.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    /// Override with the values given on the command line.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(v) = &args.test_dir {
            self.test_dir = v.clone();
        }
        if let Some(v) = args.iterations {
            self.iterations = v;
        }
        if let Some(v) = args.start_epoch {
            self.start_epoch = v;
        }
        if let Some(v) = &args.endpoint_src {
            self.endpoint_src = v.clone();
        }
        if let Some(v) = &args.endpoint_dst {
            self.endpoint_dst = v.clone();
        }
        if args.src_shard.is_some() {
            self.src_shard = args.src_shard;
        }
        if args.dst_shard.is_some() {
            self.dst_shard = args.dst_shard;
        }
        if let Some(v) = &args.exp_endpoint {
            self.exp_endpoint = v.clone();
        }
        if let Some(v) = args.delay {
            self.delay = v;
        }
        if let Some(v) = &args.chain_id {
            self.chain_id = v.clone();
        }
        if let Some(v) = &args.cli_path {
            self.cli_path = v.clone();
        }
        if let Some(v) = &args.cli_passphrase {
            self.passphrase = v.clone();
        }
        if let Some(v) = &args.keystore {
            self.keystore = v.clone();
        }
        if let Some(v) = &args.wallet_keystore {
            self.wallet_keystore = v.clone();
        }
        if let Some(v) = &args.bls_key_dir {
            self.bls_key_dir = v.clone();
        }
        if let Some(v) = args.validator_count {
            self.validator_count = v;
        }
        if let Some(v) = args.bls_keys_per_validator {
            self.bls_keys_per_validator = v;
        }
        if args.seed.is_some() {
            self.seed = args.seed;
        }
        if let Some(v) = &args.log_level {
            self.log_level = v.clone();
        }
        self.collect_rewards |= args.collect_rewards;
        self.ignore_regression_test |= args.ignore_regression_test;
        self.ignore_staking_test |= args.ignore_staking_test;
        self.log_json |= args.log_json;
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.iterations == 0 {
            bail!("iterations must be at least 1");
        }
        if self.endpoint_src.is_empty() || self.endpoint_dst.is_empty() {
            bail!("source and destination endpoints are required");
        }
        if !self.bls_key_dir.is_absolute() {
            bail!(
                "BLS key directory must be an absolute path: {}",
                self.bls_key_dir.display()
            );
        }
        Ok(())
    }

    /// Source shard, explicit or taken from the source endpoint.
    pub fn source_shard(&self) -> anyhow::Result<u32> {
        self.src_shard
            .or_else(|| shard_from_endpoint(&self.endpoint_src))
            .ok_or_else(|| anyhow!("cannot tell the shard of {}; pass --src-shard", self.endpoint_src))
    }

    /// Destination shard, explicit or taken from the destination endpoint.
    pub fn destination_shard(&self) -> anyhow::Result<u32> {
        self.dst_shard
            .or_else(|| shard_from_endpoint(&self.endpoint_dst))
            .ok_or_else(|| anyhow!("cannot tell the shard of {}; pass --dst-shard", self.endpoint_dst))
    }

    pub fn finality_delay(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    /// Wallet CLI binary, resolved against `PATH` when given as a bare name.
    pub fn cli_binary(&self) -> anyhow::Result<PathBuf> {
        let path = &self.cli_path;
        if path.components().count() > 1 || path.is_absolute() {
            if path.is_file() {
                return Ok(path.clone());
            }
            bail!("CLI binary is not found at {}, specify it with --cli-path", path.display());
        }
        let search = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&search)
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| anyhow!("CLI binary {} is not on PATH, specify it with --cli-path", path.display()))
    }

    pub fn wallet_settings(&self) -> WalletSettings {
        WalletSettings {
            chain_id: self.chain_id.clone(),
            passphrase: self.passphrase.clone(),
            node: self.endpoint_src.clone(),
            keystore_dir: self.wallet_keystore.clone(),
            ..WalletSettings::default()
        }
    }

    pub fn workflow_settings(&self, source_shard: u32) -> WorkflowSettings {
        WorkflowSettings {
            source_shard,
            start_epoch: self.start_epoch,
            finality_delay: self.finality_delay(),
            validator_count: self.validator_count,
            bls_keys_per_validator: self.bls_keys_per_validator,
            bls_key_dir: self.bls_key_dir.clone(),
            seed: self.seed,
            ..WorkflowSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.endpoint_src, "https://api.s0.b.hmny.io/");
        assert_eq!(config.iterations, 5);
        assert_eq!(config.source_shard().unwrap(), 0);
        assert_eq!(config.destination_shard().unwrap(), 1);
        assert!(config.wallet_keystore.ends_with(".hmy_cli/account-keys"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_then_args() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        std::fs::write(
            &path,
            "chain_id = \"localnet\"\niterations = 2\nendpoint_src = \"http://localhost:9500/\"\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "stakeprobe",
            "--config",
            path.to_str().unwrap(),
            "--iterations",
            "7",
            "--src-shard",
            "0",
        ]);
        let config = ProbeConfig::load(&args).unwrap();
        assert_eq!(config.chain_id, "localnet");
        assert_eq!(config.iterations, 7);
        assert_eq!(config.endpoint_src, "http://localhost:9500/");
        assert_eq!(config.source_shard().unwrap(), 0);
        assert_eq!(config.delay, 45);
    }

    #[test]
    fn test_shard_required_when_endpoint_has_none() {
        let config = ProbeConfig {
            endpoint_src: "http://node.internal:8080/".to_string(),
            ..ProbeConfig::default()
        };
        assert!(config.source_shard().is_err());

        let explicit = ProbeConfig {
            src_shard: Some(2),
            ..config
        };
        assert_eq!(explicit.source_shard().unwrap(), 2);
    }

    #[test]
    fn test_relative_bls_dir_rejected() {
        let config = ProbeConfig {
            bls_key_dir: PathBuf::from("keys"),
            ..ProbeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_binary_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("hmy");
        std::fs::write(&binary, "").unwrap();
        let config = ProbeConfig {
            cli_path: binary.clone(),
            ..ProbeConfig::default()
        };
        assert_eq!(config.cli_binary().unwrap(), binary);

        let missing = ProbeConfig {
            cli_path: dir.path().join("missing"),
            ..ProbeConfig::default()
        };
        assert!(missing.cli_binary().is_err());
    }
}
