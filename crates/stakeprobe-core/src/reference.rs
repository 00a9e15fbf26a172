//! In-memory model of the on-chain state the run expects to see.
//!
//! The workflow engine is the only writer. Reconciliation reads records by
//! shared reference and hands confirmations back for the engine to apply.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use stakeprobe_types::{Address, BlsKey, CommissionRates, Epoch};
use std::collections::VecDeque;

/// Keystore account created or imported during the run.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRef {
    pub name: String,
    pub address: Address,
    pub created_at: DateTime<Utc>,
}

impl AccountRef {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
            created_at: Utc::now(),
        }
    }
}

/// Expected state of a validator created by the run.
#[derive(Debug, Clone)]
pub struct ValidatorRef {
    pub account: AccountRef,
    /// Registered BLS keys, oldest first. Never empty.
    pub bls_keys: VecDeque<BlsKey>,
    /// Self-delegated stake in whole tokens
    pub amount: f64,
    pub commission: CommissionRates,
    pub max_total_delegation: f64,
    pub min_self_delegation: f64,
    /// Receipt of the create-validator transaction
    pub receipt: Option<Value>,
}

impl ValidatorRef {
    pub fn address(&self) -> &Address {
        &self.account.address
    }

    /// Public keys in registration order.
    pub fn public_keys(&self) -> impl Iterator<Item = &str> {
        self.bls_keys.iter().map(|k| k.public_key.as_str())
    }

    /// Oldest registered key.
    pub fn oldest_key(&self) -> Option<&BlsKey> {
        self.bls_keys.front()
    }

    /// Replace the oldest key with `new_key`. Returns the removed key.
    pub fn rotate_key(&mut self, new_key: BlsKey) -> Option<BlsKey> {
        let old = self.bls_keys.pop_front();
        self.bls_keys.push_back(new_key);
        old
    }
}

/// Undelegation issued against a delegation entry.
#[derive(Debug, Clone, PartialEq)]
pub struct UndelegationRecord {
    /// Whole tokens withdrawn
    pub amount: f64,
    /// Epoch observed when the undelegation was issued
    pub issued_epoch: Epoch,
    /// On-chain undelegation list retained once the undelegation is confirmed
    pub snapshot: Option<Value>,
}

impl UndelegationRecord {
    pub fn is_confirmed(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Delegation from one delegator to one validator.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationEntry {
    pub validator: Address,
    /// Whole tokens currently delegated; zeroed when an undelegation is confirmed
    pub amount: f64,
    pub undelegation: Option<UndelegationRecord>,
}

impl DelegationEntry {
    pub fn new(validator: Address, amount: f64) -> Self {
        Self {
            validator,
            amount,
            undelegation: None,
        }
    }

    /// Undelegation snapshot the chain is expected to report, if any.
    pub fn undelegation_snapshot(&self) -> Option<&Value> {
        self.undelegation.as_ref().and_then(|u| u.snapshot.as_ref())
    }
}

/// Expected state of a delegator created by the run.
#[derive(Debug, Clone)]
pub struct DelegatorRef {
    pub account: AccountRef,
    pub delegations: Vec<DelegationEntry>,
}

impl DelegatorRef {
    pub fn address(&self) -> &Address {
        &self.account.address
    }

    pub fn entry(&self, validator: &Address) -> Option<&DelegationEntry> {
        self.delegations.iter().find(|e| &e.validator == validator)
    }

    pub fn entry_mut(&mut self, validator: &Address) -> Option<&mut DelegationEntry> {
        self.delegations.iter_mut().find(|e| &e.validator == validator)
    }
}

/// Reference state, keyed by address in creation order.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStore {
    validators: IndexMap<Address, ValidatorRef>,
    delegators: IndexMap<Address, DelegatorRef>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_validator(&mut self, validator: ValidatorRef) {
        self.validators.insert(validator.address().clone(), validator);
    }

    pub fn insert_delegator(&mut self, delegator: DelegatorRef) {
        self.delegators.insert(delegator.address().clone(), delegator);
    }

    pub fn validator(&self, address: &Address) -> Option<&ValidatorRef> {
        self.validators.get(address)
    }

    pub fn validator_mut(&mut self, address: &Address) -> Option<&mut ValidatorRef> {
        self.validators.get_mut(address)
    }

    pub fn delegator(&self, address: &Address) -> Option<&DelegatorRef> {
        self.delegators.get(address)
    }

    pub fn delegator_mut(&mut self, address: &Address) -> Option<&mut DelegatorRef> {
        self.delegators.get_mut(address)
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorRef> {
        self.validators.values()
    }

    pub fn delegators(&self) -> impl Iterator<Item = &DelegatorRef> {
        self.delegators.values()
    }

    pub fn validator_addresses(&self) -> Vec<Address> {
        self.validators.keys().cloned().collect()
    }

    pub fn delegator_addresses(&self) -> Vec<Address> {
        self.delegators.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty() && self.delegators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ValidatorRef {
        ValidatorRef {
            account: AccountRef::new("_Test_key_validator0", Address::new("one1val")),
            bls_keys: VecDeque::from(vec![BlsKey::new("aa11", "/tmp/a.key")]),
            amount: 3.0,
            commission: CommissionRates::new(0.2, 0.5, 0.1),
            max_total_delegation: 8.0,
            min_self_delegation: 1.0,
            receipt: None,
        }
    }

    #[test]
    fn test_rotate_key_pops_oldest() {
        let mut v = validator();
        v.bls_keys.push_back(BlsKey::new("bb22", "/tmp/b.key"));
        let removed = v.rotate_key(BlsKey::new("cc33", "/tmp/c.key")).unwrap();
        assert_eq!(removed.public_key, "aa11");
        assert_eq!(v.public_keys().collect::<Vec<_>>(), vec!["bb22", "cc33"]);
    }

    #[test]
    fn test_single_key_rotation_keeps_one_key() {
        let mut v = validator();
        v.rotate_key(BlsKey::new("bb22", "/tmp/b.key"));
        assert_eq!(v.bls_keys.len(), 1);
        assert_eq!(v.oldest_key().unwrap().public_key, "bb22");
    }

    #[test]
    fn test_store_keeps_creation_order() {
        let mut store = ReferenceStore::new();
        let mut second = validator();
        second.account.address = Address::new("one1second");
        store.insert_validator(second);
        store.insert_validator(validator());
        assert_eq!(
            store.validator_addresses(),
            vec![Address::new("one1second"), Address::new("one1val")]
        );
        assert!(store.validator(&Address::new("one1val")).is_some());
    }

    #[test]
    fn test_delegator_entry_lookup() {
        let mut delegator = DelegatorRef {
            account: AccountRef::new("_Test_key_delegator0", Address::new("one1del")),
            delegations: vec![DelegationEntry::new(Address::new("one1val"), 4.0)],
        };
        assert!(delegator.entry(&Address::new("one1other")).is_none());
        let entry = delegator.entry_mut(&Address::new("one1val")).unwrap();
        entry.amount = 0.0;
        assert_eq!(delegator.entry(&Address::new("one1val")).unwrap().amount, 0.0);
        assert!(delegator.entry(&Address::new("one1val")).unwrap().undelegation_snapshot().is_none());
    }
}
