//! Typed wallet CLI operations.
//!
//! Every method renders one `hmy` invocation. Mutating calls carry the node,
//! chain id and passphrase from [`WalletSettings`]; calls that unlock BLS keys
//! or create keystore entries are driven through a prompt [`Protocol`].

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stakeprobe_types::{format_rate, Address, BlsKey, CommissionRates};
use tracing::{debug, info, warn};

use crate::error::{Result, WalletError};
use crate::protocol::Protocol;
use crate::response::{
    parse_balances, parse_cli_version, parse_dry_run_raw_transaction, parse_json_output,
    parse_key_list, parse_transaction_response, ShardBalance, TransactionResponse,
};
use crate::runner::{CommandOutput, CommandRunner};

/// Oldest wallet CLI release whose output formats are understood.
pub const MIN_CLI_VERSION: u32 = 170;

/// Seconds a transfer waits for confirmation.
pub const TRANSFER_CONFIRM_WAIT: u64 = 45;

/// Wallet settings shared by every call.
#[derive(Debug, Clone)]
pub struct WalletSettings {
    /// Chain id passed with `--chain-id`
    pub chain_id: String,
    /// Keystore passphrase (also used for generated BLS keys)
    pub passphrase: String,
    /// Node endpoint passed with `--node`
    pub node: String,
    /// Directory where the CLI keeps one sub-directory per account
    pub keystore_dir: PathBuf,
    /// Timeout of a single-shot call
    pub call_timeout: Duration,
    /// Timeout of each prompt step in an interactive call
    pub prompt_timeout: Duration,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            chain_id: "testnet".to_string(),
            passphrase: String::new(),
            node: "http://localhost:9500/".to_string(),
            keystore_dir: PathBuf::from(".hmy_cli/account-keys"),
            call_timeout: Duration::from_secs(60),
            prompt_timeout: Duration::from_secs(30),
        }
    }
}

/// Descriptive fields of a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorDescription {
    pub name: String,
    pub identity: String,
    pub website: String,
    pub security_contact: String,
    pub details: String,
}

impl ValidatorDescription {
    /// Description used for validators created by the test run.
    pub fn test_account(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: "test_account".to_string(),
            website: "harmony.one".to_string(),
            security_contact: "stakeprobe".to_string(),
            details: "none".to_string(),
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.extend([
            "--name".to_string(),
            self.name.clone(),
            "--identity".to_string(),
            self.identity.clone(),
            "--website".to_string(),
            self.website.clone(),
            "--security-contact".to_string(),
            self.security_contact.clone(),
            "--details".to_string(),
            self.details.clone(),
        ]);
    }
}

/// `staking create-validator` parameters.
#[derive(Debug, Clone)]
pub struct CreateValidatorRequest {
    pub validator: Address,
    pub description: ValidatorDescription,
    pub commission: CommissionRates,
    /// Whole tokens
    pub min_self_delegation: f64,
    /// Whole tokens
    pub max_total_delegation: f64,
    /// Initial self-delegation in whole tokens
    pub amount: f64,
    pub bls_keys: Vec<BlsKey>,
}

/// `staking edit-validator` parameters.
#[derive(Debug, Clone)]
pub struct EditValidatorRequest {
    pub validator: Address,
    pub description: ValidatorDescription,
    pub rate: f64,
    pub min_self_delegation: f64,
    pub max_total_delegation: f64,
    pub remove_bls_key: Option<String>,
    pub add_bls_key: Option<BlsKey>,
}

/// Transfer between two accounts, possibly across shards.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    pub from_shard: u32,
    pub to_shard: u32,
    /// Whole tokens
    pub amount: f64,
}

impl TransferRequest {
    fn args(&self) -> Vec<String> {
        vec![
            "transfer".to_string(),
            format!("--from={}", self.from),
            format!("--to={}", self.to),
            format!("--from-shard={}", self.from_shard),
            format!("--to-shard={}", self.to_shard),
            format!("--amount={}", self.amount),
        ]
    }
}

/// Wallet CLI driven through a [`CommandRunner`].
pub struct Wallet<R> {
    runner: R,
    settings: WalletSettings,
}

impl<R: CommandRunner> Wallet<R> {
    /// Create a wallet over `runner`.
    pub fn new(runner: R, settings: WalletSettings) -> Self {
        Self { runner, settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &WalletSettings {
        &self.settings
    }

    /// Switch the chain id used by mutating calls.
    pub fn set_chain_id(&mut self, chain_id: impl Into<String>) {
        self.settings.chain_id = chain_id.into();
    }

    /// Underlying runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    // ----- Node & chain -----

    /// Full version banner (the CLI prints it on stderr).
    pub async fn version(&self) -> Result<String> {
        let out = self.call(&["version".to_string()]).await?;
        Ok(out.combined().trim().to_string())
    }

    /// Numeric release, checked against [`MIN_CLI_VERSION`].
    pub async fn checked_version(&self) -> Result<u32> {
        let banner = self.version().await?;
        match parse_cli_version(&banner) {
            Some(version) if version >= MIN_CLI_VERSION => Ok(version),
            Some(version) => Err(WalletError::UnexpectedOutput(format!(
                "wallet CLI v{} is older than v{}",
                version, MIN_CLI_VERSION
            ))),
            None => Err(WalletError::UnexpectedOutput(format!(
                "unrecognized version banner: {}",
                banner
            ))),
        }
    }

    /// Chain ids the CLI knows about.
    pub async fn known_chains(&self) -> Result<Vec<String>> {
        let out = self.call(&args(&["blockchain", "known-chains"])).await?;
        let value = parse_json_output(&out.stdout)?;
        serde_json::from_value(value.clone()).map_err(|e| WalletError::InvalidJson {
            reason: e.to_string(),
            output: value.to_string(),
        })
    }

    // ----- Keystore -----

    /// Keystore entries as `(name, address)`.
    pub async fn list_accounts(&self) -> Result<Vec<(String, Address)>> {
        let out = self.call(&args(&["keys", "list"])).await?;
        Ok(parse_key_list(&out.stdout)
            .into_iter()
            .map(|(name, address)| (name, Address::new(address)))
            .collect())
    }

    /// Address of the keystore entry `name`.
    pub async fn address_of(&self, name: &str) -> Result<Option<Address>> {
        Ok(self
            .list_accounts()
            .await?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, address)| address))
    }

    /// Address of `name`, failing when it is not in the keystore.
    pub async fn require_address(&self, name: &str) -> Result<Address> {
        self.address_of(name)
            .await?
            .ok_or_else(|| WalletError::UnknownAccount(name.to_string()))
    }

    /// Delete the keystore entry `name`. Missing entries are not an error.
    pub async fn remove_account(&self, name: &str) -> Result<()> {
        let path = self.settings.keystore_dir.join(name);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(account = name, "removed keystore entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy the key files of `source` into the keystore entry `name`.
    ///
    /// Only files ending in `.key` or `--` (CLI generated keystore files) are
    /// copied. Returns the number of files copied.
    pub async fn import_keystore(&self, name: &str, source: &Path) -> Result<usize> {
        let target = self.settings.keystore_dir.join(name);
        let mut entries = tokio::fs::read_dir(source).await?;
        let mut copied = 0;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let file_name_str = file_name.to_string_lossy();
            if !(file_name_str.ends_with(".key") || file_name_str.ends_with("--")) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            tokio::fs::create_dir_all(&target).await?;
            tokio::fs::copy(entry.path(), target.join(&file_name)).await?;
            copied += 1;
        }
        debug!(account = name, source = %source.display(), copied, "imported keystore");
        Ok(copied)
    }

    /// Create a new key `name` protected by the configured passphrase.
    pub async fn add_key(&self, name: &str) -> Result<()> {
        let argv = args(&["keys", "add", name, "--use-own-passphrase"]);
        let protocol = Protocol::new_passphrase(&self.settings.passphrase).expect_eof();
        self.interact(&argv, &protocol).await?;
        info!(account = name, "added key");
        Ok(())
    }

    /// Generate a BLS key whose encrypted private key is written to `path`.
    pub async fn generate_bls_key(&self, path: &Path) -> Result<BlsKey> {
        let argv = vec![
            "keys".to_string(),
            "generate-bls-key".to_string(),
            "--bls-file-path".to_string(),
            path.display().to_string(),
        ];
        let protocol = Protocol::new_passphrase(&self.settings.passphrase).expect_eof();
        let output = self.interact(&argv, &protocol).await?;
        let value = parse_json_output(&output)?;
        serde_json::from_value(value.clone()).map_err(|e| WalletError::InvalidJson {
            reason: e.to_string(),
            output: value.to_string(),
        })
    }

    // ----- Balances & transfers -----

    /// Per-shard balances of `address`.
    pub async fn balances(&self, address: &Address) -> Result<Vec<ShardBalance>> {
        let argv = vec![self.node_flag(), "balances".to_string(), address.to_string()];
        let out = self.call(&argv).await?;
        parse_balances(&out.stdout)
    }

    /// Balance of `address` on `shard` in whole tokens (0 when not reported).
    pub async fn balance_on(&self, address: &Address, shard: u32) -> Result<f64> {
        Ok(self
            .balances(address)
            .await?
            .into_iter()
            .find(|b| b.shard == shard)
            .map(|b| b.amount)
            .unwrap_or(0.0))
    }

    /// Transfer and wait for confirmation. Returns the CLI output.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<String> {
        let mut argv = vec![self.node_flag()];
        argv.extend(request.args());
        argv.extend(self.signing_flags());
        argv.push(format!("--wait-for-confirm={}", TRANSFER_CONFIRM_WAIT));
        let out = self.call(&argv).await?;
        info!(from = %request.from, to = %request.to, amount = request.amount, "transfer confirmed");
        Ok(out.stdout)
    }

    /// Sign a transfer without submitting it and return the raw transaction hex.
    pub async fn dry_run_transfer(&self, request: &TransferRequest) -> Result<String> {
        let mut argv = vec![self.node_flag()];
        argv.extend(request.args());
        argv.extend(self.signing_flags());
        argv.push("--dry-run".to_string());
        let out = self.call(&argv).await?;
        parse_dry_run_raw_transaction(&out.stdout)
    }

    // ----- Staking transactions -----

    /// Submit `staking create-validator`, unlocking every BLS key.
    pub async fn create_validator(&self, request: &CreateValidatorRequest) -> Result<TransactionResponse> {
        let keys = request
            .bls_keys
            .iter()
            .map(|k| k.public_key.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let mut argv = vec![
            self.node_flag(),
            "staking".to_string(),
            "create-validator".to_string(),
            "--validator-addr".to_string(),
            request.validator.to_string(),
        ];
        request.description.push_args(&mut argv);
        argv.extend([
            "--rate".to_string(),
            format_rate(request.commission.rate),
            "--max-rate".to_string(),
            format_rate(request.commission.max_rate),
            "--max-change-rate".to_string(),
            format_rate(request.commission.max_change_rate),
            "--min-self-delegation".to_string(),
            request.min_self_delegation.to_string(),
            "--max-total-delegation".to_string(),
            request.max_total_delegation.to_string(),
            "--amount".to_string(),
            request.amount.to_string(),
            "--bls-pubkeys".to_string(),
            keys,
        ]);
        argv.extend(self.signing_flags());

        let protocol = Protocol::unlock_bls_keys(&request.bls_keys, &self.settings.passphrase).expect_eof();
        let output = self.interact(&argv, &protocol).await?;
        let response = parse_transaction_response(&output)?;
        info!(validator = %request.validator, receipt = ?response.hash(), "create-validator submitted");
        Ok(response)
    }

    /// Submit `staking edit-validator`, unlocking the added BLS key if any.
    pub async fn edit_validator(&self, request: &EditValidatorRequest) -> Result<TransactionResponse> {
        let mut argv = vec![
            self.node_flag(),
            "staking".to_string(),
            "edit-validator".to_string(),
            "--validator-addr".to_string(),
            request.validator.to_string(),
        ];
        request.description.push_args(&mut argv);
        argv.extend([
            "--rate".to_string(),
            format_rate(request.rate),
            "--min-self-delegation".to_string(),
            request.min_self_delegation.to_string(),
            "--max-total-delegation".to_string(),
            request.max_total_delegation.to_string(),
        ]);
        if let Some(old) = &request.remove_bls_key {
            argv.extend(["--remove-bls-key".to_string(), old.clone()]);
        }
        let added: Vec<BlsKey> = request.add_bls_key.iter().cloned().collect();
        if let Some(new) = &request.add_bls_key {
            argv.extend(["--add-bls-key".to_string(), new.public_key.clone()]);
        }
        argv.extend(self.signing_flags());

        let protocol = Protocol::unlock_bls_keys(&added, &self.settings.passphrase).expect_eof();
        let output = self.interact(&argv, &protocol).await?;
        let response = parse_transaction_response(&output)?;
        info!(validator = %request.validator, receipt = ?response.hash(), "edit-validator submitted");
        Ok(response)
    }

    /// Delegate `amount` tokens from `delegator` to `validator`.
    pub async fn delegate(&self, validator: &Address, delegator: &Address, amount: f64) -> Result<TransactionResponse> {
        self.delegation_call("delegate", validator, delegator, amount).await
    }

    /// Undelegate `amount` tokens from `validator`.
    pub async fn undelegate(&self, validator: &Address, delegator: &Address, amount: f64) -> Result<TransactionResponse> {
        self.delegation_call("undelegate", validator, delegator, amount).await
    }

    /// Collect the block rewards owed to `delegator`.
    pub async fn collect_rewards(&self, delegator: &Address) -> Result<TransactionResponse> {
        let mut argv = args(&["staking", "collect-rewards", "--delegator-addr"]);
        argv.push(delegator.to_string());
        argv.push(self.node_flag());
        argv.extend(self.signing_flags());
        let out = self.call(&argv).await?;
        parse_transaction_response(&out.stdout)
    }

    async fn delegation_call(
        &self,
        action: &str,
        validator: &Address,
        delegator: &Address,
        amount: f64,
    ) -> Result<TransactionResponse> {
        let mut argv = args(&["staking", action]);
        argv.extend([
            "--validator-addr".to_string(),
            validator.to_string(),
            "--delegator-addr".to_string(),
            delegator.to_string(),
            "--amount".to_string(),
            amount.to_string(),
            self.node_flag(),
        ]);
        argv.extend(self.signing_flags());
        let out = self.call(&argv).await?;
        let response = parse_transaction_response(&out.stdout)?;
        info!(%validator, %delegator, amount, action, receipt = ?response.hash(), "staking transaction submitted");
        Ok(response)
    }

    // ----- Staking queries -----

    /// Addresses of every validator.
    pub async fn validator_all(&self) -> Result<Value> {
        self.query(&["blockchain", "validator", "all"], None).await
    }

    /// Addresses of the validators elected for the current epoch.
    pub async fn validator_all_active(&self) -> Result<Value> {
        self.query(&["blockchain", "validator", "all-active"], None).await
    }

    /// Validator information document.
    pub async fn validator_information(&self, address: &Address) -> Result<Value> {
        self.query(&["blockchain", "validator", "information"], Some(address)).await
    }

    /// Delegations received by a validator.
    pub async fn delegations_by_validator(&self, address: &Address) -> Result<Value> {
        self.query(&["blockchain", "delegation", "by-validator"], Some(address)).await
    }

    /// Delegations made by a delegator.
    pub async fn delegations_by_delegator(&self, address: &Address) -> Result<Value> {
        self.query(&["blockchain", "delegation", "by-delegator"], Some(address)).await
    }

    /// Run a query and unwrap its JSON-RPC `result`.
    async fn query(&self, command: &[&str], address: Option<&Address>) -> Result<Value> {
        let mut argv = vec![self.node_flag()];
        argv.extend(args(command));
        if let Some(address) = address {
            argv.push(address.to_string());
        }
        let out = self.call(&argv).await?;
        let mut value = parse_json_output(&out.stdout)?;
        match value.get_mut("result").map(Value::take) {
            Some(Value::Null) => Err(WalletError::EmptyResult {
                command: command.join(" "),
            }),
            Some(result) => Ok(result),
            None => Err(WalletError::UnexpectedOutput(format!(
                "`{}` returned no result field: {}",
                command.join(" "),
                value
            ))),
        }
    }

    // ----- Plumbing -----

    fn node_flag(&self) -> String {
        format!("--node={}", self.settings.node)
    }

    fn signing_flags(&self) -> [String; 2] {
        [
            format!("--chain-id={}", self.settings.chain_id),
            format!("--passphrase={}", self.settings.passphrase),
        ]
    }

    async fn call(&self, argv: &[String]) -> Result<CommandOutput> {
        self.runner.run(argv, self.settings.call_timeout).await
    }

    async fn interact(&self, argv: &[String], protocol: &Protocol) -> Result<String> {
        let mut session = self.runner.spawn(argv).await?;
        let captured = protocol.run(&mut session, self.settings.prompt_timeout).await?;
        let label = session.label().to_string();
        if let Some(status) = session.wait().await? {
            if !status.success() {
                warn!(command = %label, %status, "interactive wallet command failed");
                return Err(WalletError::CommandFailed {
                    command: label,
                    status: status.to_string(),
                    output: captured,
                });
            }
        }
        Ok(captured)
    }
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
