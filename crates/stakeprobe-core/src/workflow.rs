//! Staking workflow engine.
//!
//! Drives the staking lifecycle through a fixed sequence of stages:
//!
//! ```text
//! Idle -> KeysLoaded -> ValidatorsCreated -> ValidatorsVerified
//!      -> DelegatorsCreated -> DelegatorsVerified -> Edited
//!      -> Undelegated -> Reconciled -> Done
//! ```
//!
//! Every transition is a method that refuses to run from any other stage.
//! Verification methods return `Ok(false)` when the chain disagrees with the
//! reference store and still advance; errors are reserved for failures that
//! make the rest of the run meaningless (no funds, broken wallet output).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use stakeprobe_rpc::{EpochGate, EpochSource};
use stakeprobe_types::{Address, BlsKey, CommissionRates, Epoch};
use stakeprobe_wallet::{
    CommandRunner, CreateValidatorRequest, EditValidatorRequest, TransferRequest,
    ValidatorDescription, Wallet, WalletError,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::context::{account_name, TestContext, ACCOUNT_NAME_PREFIX};
use crate::error::{Mismatch, Result, WorkflowError};
use crate::reconcile::{
    check_delegations, check_pool_membership, check_self_delegation, check_validator_information,
    confirm_undelegation, is_active_member, UndelegationConfirmation,
};
use crate::reference::{
    AccountRef, DelegationEntry, DelegatorRef, ReferenceStore, UndelegationRecord, ValidatorRef,
};

/// Workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    KeysLoaded,
    ValidatorsCreated,
    ValidatorsVerified,
    DelegatorsCreated,
    DelegatorsVerified,
    Edited,
    Undelegated,
    Reconciled,
    Done,
}

/// Workflow parameters.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Shard holding the funding balances
    pub source_shard: u32,
    /// Epoch the run waits for before staking
    pub start_epoch: Epoch,
    /// Wait after submitting transactions before verifying them
    pub finality_delay: Duration,
    /// Validators to create
    pub validator_count: usize,
    /// Self-delegated stake of each validator, whole tokens
    pub validator_stake: u64,
    /// Upper bound of the initial `max_total_delegation` draw
    pub max_total_delegation_cap: u64,
    /// Upper bound of the `max_total_delegation` increase on edit
    pub max_delegation_increase: u64,
    /// Whole tokens
    pub min_self_delegation: f64,
    /// Tokens reserved for transaction fees on every funding transfer
    pub gas_margin: f64,
    /// BLS keys registered per validator
    pub bls_keys_per_validator: usize,
    /// Absolute directory receiving generated BLS key files
    pub bls_key_dir: PathBuf,
    /// Seed of the random draws; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            source_shard: 0,
            start_epoch: 1,
            finality_delay: Duration::from_secs(45),
            validator_count: 1,
            validator_stake: 3,
            max_total_delegation_cap: 10,
            max_delegation_increase: 10,
            min_self_delegation: 1.0,
            gas_margin: 1.0,
            bls_keys_per_validator: 1,
            bls_key_dir: std::env::temp_dir(),
            seed: None,
        }
    }
}

impl WorkflowSettings {
    /// Check the parameter constraints.
    pub fn validate(&self) -> Result<()> {
        if !self.bls_key_dir.is_absolute() {
            return Err(WorkflowError::InvalidSettings(format!(
                "BLS key directory must be absolute: {}",
                self.bls_key_dir.display()
            )));
        }
        if self.validator_count == 0 || self.bls_keys_per_validator == 0 {
            return Err(WorkflowError::InvalidSettings(
                "need at least one validator and one BLS key per validator".to_string(),
            ));
        }
        if (self.validator_stake as f64) <= self.min_self_delegation {
            return Err(WorkflowError::InvalidSettings(format!(
                "validator stake {} must exceed min-self-delegation {}",
                self.validator_stake, self.min_self_delegation
            )));
        }
        if self.validator_stake + 1 > self.max_total_delegation_cap {
            return Err(WorkflowError::InvalidSettings(format!(
                "max-total-delegation cap {} leaves no room for delegations over stake {}",
                self.max_total_delegation_cap, self.validator_stake
            )));
        }
        if self.max_delegation_increase == 0 {
            return Err(WorkflowError::InvalidSettings(
                "max-total-delegation increase must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Staking lifecycle state machine.
pub struct StakingWorkflow<R, S> {
    wallet: Wallet<R>,
    gate: EpochGate<S>,
    settings: WorkflowSettings,
    store: ReferenceStore,
    stage: Stage,
    rng: StdRng,
    funding: Vec<String>,
    bls_keys_generated: usize,
    mismatches: Vec<Mismatch>,
}

impl<R: CommandRunner, S: EpochSource> StakingWorkflow<R, S> {
    /// Create a workflow in the `Idle` stage.
    pub fn new(wallet: Wallet<R>, gate: EpochGate<S>, settings: WorkflowSettings) -> Result<Self> {
        settings.validate()?;
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            wallet,
            gate,
            settings,
            store: ReferenceStore::new(),
            stage: Stage::Idle,
            rng,
            funding: Vec::new(),
            bls_keys_generated: 0,
            mismatches: Vec::new(),
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    pub fn wallet(&self) -> &Wallet<R> {
        &self.wallet
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Funding accounts in load order.
    pub fn funding_accounts(&self) -> &[String] {
        &self.funding
    }

    /// Mismatches found by the most recent verification.
    pub fn last_mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }

    // ----- Stage: Idle -> KeysLoaded -----

    /// Import every sub-directory of `source` as a funding account.
    ///
    /// Sub-directories are taken in name order; the i-th becomes
    /// `_Test_key_funding_<i>`. At least two accounts must load.
    pub async fn load_keys(&mut self, ctx: &mut TestContext, source: &Path) -> Result<usize> {
        self.expect_stage("load_keys", &[Stage::Idle])?;

        let mut entries = tokio::fs::read_dir(source).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }
        paths.sort();

        for (index, path) in paths.iter().enumerate() {
            if !tokio::fs::metadata(path).await?.is_dir() {
                continue;
            }
            let name = account_name("funding_", index);
            self.wallet.remove_account(&name).await?;
            let copied = self.wallet.import_keystore(&name, path).await?;
            if copied == 0 {
                debug!(source = %path.display(), "no key files, skipping");
                continue;
            }
            ctx.record_account(name.as_str());
            self.funding.push(name);
        }

        if self.funding.len() < 2 {
            return Err(WorkflowError::NotEnoughAccounts {
                loaded: self.funding.len(),
            });
        }
        info!(accounts = self.funding.len(), "loaded funding keys");
        self.stage = Stage::KeysLoaded;
        Ok(self.funding.len())
    }

    /// Block until the configured start epoch is reached.
    pub async fn wait_for_start_epoch(&self) {
        if self.settings.start_epoch == 0 {
            return;
        }
        info!(epoch = self.settings.start_epoch, "waiting for start epoch (or later)");
        self.gate
            .wait_until_after_epoch(self.settings.start_epoch - 1)
            .await;
    }

    /// Sleep for the finality delay.
    pub async fn wait_for_finality(&self) {
        info!(delay = ?self.settings.finality_delay, "sleeping for finality");
        tokio::time::sleep(self.settings.finality_delay).await;
    }

    // ----- Stage: KeysLoaded -> ValidatorsCreated -----

    /// Create, fund and register the validators.
    pub async fn create_validators(&mut self, ctx: &mut TestContext) -> Result<Vec<Address>> {
        self.expect_stage("create_validators", &[Stage::KeysLoaded])?;

        let count = self.settings.validator_count;
        let stake = self.settings.validator_stake as f64;
        let gas = self.settings.gas_margin;
        let faucet = self.select_funding(count as f64 * (stake + gas)).await?;

        // Staking transactions are rejected in epoch 0.
        self.gate.wait_until_after_epoch(0).await;

        let mut created = Vec::with_capacity(count);
        for index in 0..count {
            let account = self.create_account(ctx, &account_name("validator", index)).await?;
            self.fund(&faucet, &account.address, stake + gas).await?;

            let bls_keys = self.generate_bls_keys(self.settings.bls_keys_per_validator).await?;
            let max_total_delegation = self
                .rng
                .gen_range(self.settings.validator_stake + 1..=self.settings.max_total_delegation_cap)
                as f64;
            let commission = CommissionRates::random(&mut self.rng);

            let request = CreateValidatorRequest {
                validator: account.address.clone(),
                description: ValidatorDescription::test_account(account.name.as_str()),
                commission,
                min_self_delegation: self.settings.min_self_delegation,
                max_total_delegation,
                amount: stake,
                bls_keys: bls_keys.clone(),
            };
            let response = self.wallet.create_validator(&request).await?;
            info!(
                validator = %account.address,
                rate = commission.rate,
                max_rate = commission.max_rate,
                max_change_rate = commission.max_change_rate,
                max_total_delegation,
                keys = bls_keys.len(),
                "created validator"
            );

            created.push(account.address.clone());
            self.store.insert_validator(ValidatorRef {
                account,
                bls_keys: bls_keys.into(),
                amount: stake,
                commission,
                max_total_delegation,
                min_self_delegation: self.settings.min_self_delegation,
                receipt: Some(response.receipt),
            });
        }

        self.stage = Stage::ValidatorsCreated;
        Ok(created)
    }

    // ----- Stage: ValidatorsCreated -> ValidatorsVerified (and re-check in Edited) -----

    /// Compare every validator with the chain.
    ///
    /// Runs after creation (advancing to `ValidatorsVerified`) and again
    /// after the edit, where the stage stays `Edited`.
    pub async fn verify_validators(&mut self) -> Result<bool> {
        let advance = match self.stage {
            Stage::ValidatorsCreated => true,
            Stage::Edited => false,
            stage => {
                return Err(WorkflowError::OutOfOrder {
                    operation: "verify_validators",
                    stage,
                })
            }
        };

        let all = self.wallet.validator_all().await?;
        let active = self.wallet.validator_all_active().await?;
        let mut mismatches = Vec::new();

        for reference in self.store.validators() {
            let address = reference.address();
            if let Err(m) = check_pool_membership(&all, address) {
                mismatches.push(m);
                continue;
            }
            if is_active_member(&active, address) {
                info!(validator = %address, "validator in pool of active validators");
            } else {
                warn!(validator = %address, "validator not in pool of active validators");
            }

            let information = match query_outcome(address, self.wallet.validator_information(address).await)? {
                Ok(information) => information,
                Err(m) => {
                    mismatches.push(m);
                    continue;
                }
            };
            debug!(validator = %address, %information, "validator information");
            let delegations = match query_outcome(address, self.wallet.delegations_by_validator(address).await)? {
                Ok(delegations) => delegations,
                Err(m) => {
                    mismatches.push(m);
                    continue;
                }
            };
            let outcome = check_validator_information(&information, reference)
                .and_then(|()| check_self_delegation(&delegations, address));
            match outcome {
                Ok(()) => info!(validator = %address, "validator matches reference"),
                Err(m) => mismatches.push(m),
            }
        }

        if advance {
            self.stage = Stage::ValidatorsVerified;
        }
        Ok(self.finish_verification("verify_validators", mismatches))
    }

    // ----- Stage: ValidatorsVerified -> DelegatorsCreated -----

    /// Create one funded delegator per validator and delegate to it.
    pub async fn create_delegators(&mut self, ctx: &mut TestContext) -> Result<Vec<Address>> {
        self.expect_stage("create_delegators", &[Stage::ValidatorsVerified])?;

        let gas = self.settings.gas_margin;
        let mut created = Vec::new();
        for (index, validator) in self.store.validator_addresses().into_iter().enumerate() {
            let headroom = match self.store.validator(&validator) {
                Some(v) => (v.max_total_delegation - v.amount).floor() as u64,
                None => continue,
            };
            if headroom == 0 {
                warn!(%validator, "no delegation headroom, skipping");
                continue;
            }
            let amount = self.rng.gen_range(1..=headroom) as f64;

            let faucet = self.select_funding(amount + 2.0 * gas).await?;
            let account = self.create_account(ctx, &account_name("delegator", index)).await?;
            self.fund(&faucet, &account.address, amount + gas).await?;

            self.wallet.delegate(&validator, &account.address, amount).await?;
            info!(delegator = %account.address, %validator, amount, "delegated");

            created.push(account.address.clone());
            self.store.insert_delegator(DelegatorRef {
                account,
                delegations: vec![DelegationEntry::new(validator, amount)],
            });
        }

        self.stage = Stage::DelegatorsCreated;
        Ok(created)
    }

    // ----- Stage: DelegatorsCreated -> DelegatorsVerified -----

    /// Compare every delegator's delegations with the chain.
    pub async fn verify_delegators(&mut self) -> Result<bool> {
        self.expect_stage("verify_delegators", &[Stage::DelegatorsCreated])?;

        let mut mismatches = Vec::new();
        for reference in self.store.delegators() {
            let address = reference.address();
            let observed = match query_outcome(address, self.wallet.delegations_by_delegator(address).await)? {
                Ok(observed) => observed,
                Err(m) => {
                    mismatches.push(m);
                    continue;
                }
            };
            match check_delegations(&observed, reference) {
                Ok(()) => info!(delegator = %reference.address(), "delegations match reference"),
                Err(m) => mismatches.push(m),
            }
        }

        self.stage = Stage::DelegatorsVerified;
        Ok(self.finish_verification("verify_delegators", mismatches))
    }

    // ----- Stage: DelegatorsVerified -> Edited -----

    /// Raise every validator's delegation cap and rotate its oldest BLS key.
    pub async fn edit_validators(&mut self) -> Result<()> {
        self.expect_stage("edit_validators", &[Stage::DelegatorsVerified])?;

        for address in self.store.validator_addresses() {
            let (name, rate, cap, old_key) = match self.store.validator(&address) {
                Some(v) => (
                    v.account.name.clone(),
                    v.commission.rate,
                    v.max_total_delegation,
                    v.oldest_key().map(|k| k.public_key.clone()),
                ),
                None => continue,
            };
            let increase = self.rng.gen_range(1..=self.settings.max_delegation_increase) as f64;
            let max_total_delegation = cap + increase;
            let new_key = self.generate_bls_key().await?;

            let request = EditValidatorRequest {
                validator: address.clone(),
                description: ValidatorDescription::test_account(name),
                rate,
                min_self_delegation: self.settings.min_self_delegation,
                max_total_delegation,
                remove_bls_key: old_key.clone(),
                add_bls_key: Some(new_key.clone()),
            };
            self.wallet.edit_validator(&request).await?;
            info!(
                validator = %address,
                max_total_delegation,
                removed_key = ?old_key,
                added_key = %new_key.public_key,
                "edited validator"
            );

            if let Some(v) = self.store.validator_mut(&address) {
                v.rotate_key(new_key);
                v.max_total_delegation = max_total_delegation;
            }
        }

        self.stage = Stage::Edited;
        Ok(())
    }

    // ----- Stage: Edited -> Undelegated -----

    /// Withdraw every delegation in full, recording the issuance epoch.
    pub async fn undelegate(&mut self) -> Result<()> {
        self.expect_stage("undelegate", &[Stage::Edited])?;

        for delegator in self.store.delegator_addresses() {
            let entries: Vec<DelegationEntry> = self
                .store
                .delegator(&delegator)
                .map(|d| d.delegations.clone())
                .unwrap_or_default();
            for entry in entries {
                let issued_epoch = self.gate.source().current_epoch().await?;
                self.wallet
                    .undelegate(&entry.validator, &delegator, entry.amount)
                    .await?;
                info!(%delegator, validator = %entry.validator, amount = entry.amount, epoch = issued_epoch, "undelegated");

                if let Some(e) = self
                    .store
                    .delegator_mut(&delegator)
                    .and_then(|d| d.entry_mut(&entry.validator))
                {
                    e.undelegation = Some(UndelegationRecord {
                        amount: entry.amount,
                        issued_epoch,
                        snapshot: None,
                    });
                }
            }
        }

        self.stage = Stage::Undelegated;
        Ok(())
    }

    // ----- Stage: Undelegated -> Reconciled -----

    /// Confirm every issued undelegation and re-check the delegations.
    ///
    /// Confirmed undelegations zero the reference amount and retain the
    /// on-chain undelegation list for later comparisons.
    pub async fn reconcile_undelegations(&mut self) -> Result<bool> {
        self.expect_stage("reconcile_undelegations", &[Stage::Undelegated])?;

        let mut mismatches = Vec::new();
        for delegator in self.store.delegator_addresses() {
            let observed = match query_outcome(&delegator, self.wallet.delegations_by_delegator(&delegator).await)? {
                Ok(observed) => observed,
                Err(m) => {
                    mismatches.push(m);
                    continue;
                }
            };

            let mut confirmations = Vec::new();
            if let Some(reference) = self.store.delegator(&delegator) {
                for entry in &reference.delegations {
                    let Some(issued) = entry.undelegation.as_ref().filter(|u| !u.is_confirmed()) else {
                        continue;
                    };
                    match confirm_undelegation(&observed, &delegator, &entry.validator, issued) {
                        Ok(confirmation) => confirmations.push(confirmation),
                        Err(m) => mismatches.push(m),
                    }
                }
            }
            for confirmation in confirmations {
                self.apply_undelegation(&delegator, confirmation);
            }

            if let Some(reference) = self.store.delegator(&delegator) {
                if let Err(m) = check_delegations(&observed, reference) {
                    mismatches.push(m);
                }
            }
        }

        self.stage = Stage::Reconciled;
        Ok(self.finish_verification("reconcile_undelegations", mismatches))
    }

    fn apply_undelegation(&mut self, delegator: &Address, confirmation: UndelegationConfirmation) {
        let Some(entry) = self
            .store
            .delegator_mut(delegator)
            .and_then(|d| d.entry_mut(&confirmation.validator))
        else {
            return;
        };
        entry.amount = 0.0;
        if let Some(record) = entry.undelegation.as_mut() {
            record.snapshot = Some(confirmation.snapshot);
        }
        info!(
            %delegator,
            validator = %confirmation.validator,
            epoch = confirmation.epoch,
            matched = ?confirmation.epoch_match,
            "undelegation confirmed"
        );
    }

    // ----- Optional, in Reconciled -----

    /// Submit `collect-rewards` for every delegator.
    ///
    /// A rejected submission (for instance, nothing to collect yet) fails the
    /// scenario without aborting the run.
    pub async fn collect_rewards(&mut self) -> Result<bool> {
        self.expect_stage("collect_rewards", &[Stage::Reconciled])?;

        let mut passed = true;
        for delegator in self.store.delegator_addresses() {
            match self.wallet.collect_rewards(&delegator).await {
                Ok(response) => info!(%delegator, receipt = ?response.hash(), "collected rewards"),
                Err(e @ WalletError::CommandFailed { .. }) => {
                    error!(%delegator, error = %e, "collect-rewards rejected");
                    passed = false;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(passed)
    }

    // ----- Stage: Reconciled -> Done -----

    pub fn finish(&mut self) -> Result<()> {
        self.expect_stage("finish", &[Stage::Reconciled])?;
        self.stage = Stage::Done;
        Ok(())
    }

    // ----- Helpers -----

    fn expect_stage(&self, operation: &'static str, allowed: &[Stage]) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(WorkflowError::OutOfOrder {
                operation,
                stage: self.stage,
            })
        }
    }

    fn finish_verification(&mut self, operation: &str, mismatches: Vec<Mismatch>) -> bool {
        for m in &mismatches {
            error!(operation, field = m.field(), "{}", m);
        }
        let passed = mismatches.is_empty();
        self.mismatches = mismatches;
        passed
    }

    /// First funding account holding more than `required` on the source shard.
    async fn select_funding(&self, required: f64) -> Result<String> {
        let shard = self.settings.source_shard;
        for name in &self.funding {
            let address = self.wallet.require_address(name).await?;
            let balance = self.wallet.balance_on(&address, shard).await?;
            debug!(account = %name, balance, required, "funding candidate");
            if balance > required {
                return Ok(name.clone());
            }
        }
        Err(WorkflowError::InsufficientFunds { required, shard })
    }

    async fn fund(&self, from: &str, to: &Address, amount: f64) -> Result<()> {
        let shard = self.settings.source_shard;
        let request = TransferRequest {
            from: self.wallet.require_address(from).await?,
            to: to.clone(),
            from_shard: shard,
            to_shard: shard,
            amount,
        };
        self.wallet.transfer(&request).await?;
        let balance = self.wallet.balance_on(to, shard).await?;
        info!(from, to = %to, amount, balance, "funded account");
        Ok(())
    }

    /// Create a fresh keystore entry, replacing any leftover one.
    ///
    /// The name is recorded for cleanup before the interactive add starts.
    async fn create_account(&mut self, ctx: &mut TestContext, name: &str) -> Result<AccountRef> {
        self.wallet.remove_account(name).await?;
        ctx.record_account(name);
        self.wallet.add_key(name).await?;
        let address = self.wallet.require_address(name).await?;
        Ok(AccountRef::new(name, address))
    }

    async fn generate_bls_keys(&mut self, count: usize) -> Result<Vec<BlsKey>> {
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(self.generate_bls_key().await?);
        }
        Ok(keys)
    }

    async fn generate_bls_key(&mut self) -> Result<BlsKey> {
        let path = self.settings.bls_key_dir.join(format!(
            "{}bls{}.key",
            ACCOUNT_NAME_PREFIX, self.bls_keys_generated
        ));
        self.bls_keys_generated += 1;
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        let key = self.wallet.generate_bls_key(&path).await?;
        debug!(public_key = %key.public_key, path = %path.display(), "generated BLS key");
        Ok(key)
    }
}

/// Split a per-subject query outcome: a null `result` is a mismatch on
/// `subject`, any other wallet failure stays fatal.
fn query_outcome(
    subject: &Address,
    outcome: stakeprobe_wallet::Result<Value>,
) -> Result<std::result::Result<Value, Mismatch>> {
    match outcome {
        Ok(value) => Ok(Ok(value)),
        Err(WalletError::EmptyResult { command }) => {
            warn!(%subject, %command, "query returned no result");
            Ok(Err(Mismatch::MissingField {
                subject: subject.to_string(),
                field: "result".to_string(),
            }))
        }
        Err(e) => Err(e.into()),
    }
}
