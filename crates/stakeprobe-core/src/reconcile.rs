//! Comparison of observed chain documents with the reference model.
//!
//! Every function is pure: it reads a JSON document returned by a wallet
//! query and a reference record, and either accepts the pair or names the
//! first field that disagrees. Running a check twice on the same inputs gives
//! the same answer.

use serde_json::Value;
use stakeprobe_types::{base_units_from_json, rate_matches, same_bls_key, to_base_units, Address, Epoch};
use tracing::warn;

use crate::error::Mismatch;
use crate::reference::{DelegationEntry, DelegatorRef, UndelegationRecord, ValidatorRef};

/// Result of a reconciliation check.
pub type CheckResult<T = ()> = std::result::Result<T, Mismatch>;

/// How closely a confirmed undelegation epoch matched its issuance epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochMatch {
    Exact,
    OffByOne,
}

/// Undelegation observed on chain, to be applied to the reference store.
#[derive(Debug, Clone, PartialEq)]
pub struct UndelegationConfirmation {
    pub validator: Address,
    pub epoch: Epoch,
    pub epoch_match: EpochMatch,
    /// Full on-chain undelegation list of the delegation
    pub snapshot: Value,
}

/// Require `validator` in the `blockchain validator all` result.
pub fn check_pool_membership(all_validators: &Value, validator: &Address) -> CheckResult {
    if address_list_contains(all_validators, validator) {
        Ok(())
    } else {
        Err(Mismatch::NotInPool {
            validator: validator.to_string(),
        })
    }
}

/// Whether `validator` is in the `blockchain validator all-active` result.
/// Informational only; an inactive validator is not a failure.
pub fn is_active_member(active_validators: &Value, validator: &Address) -> bool {
    address_list_contains(active_validators, validator)
}

fn address_list_contains(list: &Value, address: &Address) -> bool {
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .any(|item| address.matches(item))
        })
        .unwrap_or(false)
}

/// Compare a `blockchain validator information` result with the reference.
///
/// Checks the BLS key set (by value), `max_total_delegation` and
/// `min_self_delegation` in base units, and the three commission rates.
pub fn check_validator_information(information: &Value, reference: &ValidatorRef) -> CheckResult {
    let subject = format!("validator {}", reference.address());
    // Newer nodes nest the record under `validator`.
    let info = information
        .get("validator")
        .filter(|v| v.is_object())
        .unwrap_or(information);

    let observed_keys: Vec<&str> = info
        .get("slot_pub_keys")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .ok_or_else(|| missing(&subject, "slot_pub_keys"))?;
    let expected_keys: Vec<&str> = reference.public_keys().collect();
    let unexpected = observed_keys
        .iter()
        .any(|o| !expected_keys.iter().any(|e| same_bls_key(o, e)));
    let absent = expected_keys
        .iter()
        .any(|e| !observed_keys.iter().any(|o| same_bls_key(o, e)));
    if unexpected || absent || observed_keys.len() != expected_keys.len() {
        return Err(Mismatch::Field {
            subject,
            field: "slot_pub_keys".to_string(),
            expected: format!("{:?}", expected_keys),
            observed: format!("{:?}", observed_keys),
        });
    }

    check_base_units(
        &subject,
        info,
        "max_total_delegation",
        to_base_units(reference.max_total_delegation),
    )?;
    check_base_units(
        &subject,
        info,
        "min_self_delegation",
        to_base_units(reference.min_self_delegation),
    )?;

    let rates = info
        .get("commission")
        .and_then(|c| c.get("commission_rates"))
        .ok_or_else(|| missing(&subject, "commission.commission_rates"))?;
    let commission = &reference.commission;
    for (field, expected) in [
        ("rate", commission.rate),
        ("max_rate", commission.max_rate),
        ("max_change_rate", commission.max_change_rate),
    ] {
        let observed = rates
            .get(field)
            .and_then(decimal_from_json)
            .ok_or_else(|| missing(&subject, field))?;
        if !rate_matches(expected, observed) {
            return Err(Mismatch::Field {
                subject,
                field: field.to_string(),
                expected: expected.to_string(),
                observed: observed.to_string(),
            });
        }
    }
    Ok(())
}

/// Require exactly one self-delegation in a `by-validator` delegation list.
pub fn check_self_delegation(delegations: &Value, validator: &Address) -> CheckResult {
    let count = delegation_items(delegations)
        .filter(|d| {
            str_field(d, "delegator_address").is_some_and(|a| validator.matches(a))
                && str_field(d, "validator_address").is_some_and(|a| validator.matches(a))
        })
        .count();
    match count {
        1 => Ok(()),
        0 => Err(Mismatch::NoSelfDelegation {
            validator: validator.to_string(),
        }),
        count => Err(Mismatch::DuplicateSelfDelegation {
            validator: validator.to_string(),
            count,
        }),
    }
}

/// Compare a `by-delegator` delegation list with every entry of `reference`.
///
/// Each reference entry needs exactly one on-chain delegation to its
/// validator, carrying the scaled reference amount. When the chain reports
/// undelegations for it, their serialized form must equal the retained
/// snapshot.
pub fn check_delegations(delegations: &Value, reference: &DelegatorRef) -> CheckResult {
    for entry in &reference.delegations {
        let observed = single_delegation(delegations, reference.address(), &entry.validator)?;
        check_delegation_entry(observed, reference.address(), entry)?;
    }
    Ok(())
}

fn check_delegation_entry(observed: &Value, delegator: &Address, entry: &DelegationEntry) -> CheckResult {
    let subject = format!("delegation {} -> {}", delegator, entry.validator);
    check_base_units(&subject, observed, "amount", to_base_units(entry.amount))?;

    let on_chain = undelegations_of(observed);
    let has_undelegations = on_chain
        .and_then(Value::as_array)
        .is_some_and(|list| !list.is_empty());
    if has_undelegations {
        let observed_text = on_chain.map(Value::to_string).unwrap_or_default();
        let expected_text = entry
            .undelegation_snapshot()
            .map(Value::to_string)
            .unwrap_or_else(|| "none".to_string());
        if observed_text != expected_text {
            return Err(Mismatch::Field {
                subject,
                field: "undelegations".to_string(),
                expected: expected_text,
                observed: observed_text,
            });
        }
    }
    Ok(())
}

/// Accept an undelegation epoch within one epoch of issuance.
///
/// An off-by-one epoch is logged as a warning: the epoch may turn between
/// issuance and inclusion.
pub fn check_undelegation_epoch(issued: Epoch, observed: Epoch) -> CheckResult<EpochMatch> {
    match issued.abs_diff(observed) {
        0 => Ok(EpochMatch::Exact),
        1 => {
            warn!(issued, observed, "undelegation confirmed one epoch off its issuance epoch");
            Ok(EpochMatch::OffByOne)
        }
        _ => Err(Mismatch::UndelegationEpoch { issued, observed }),
    }
}

/// Confirm an issued undelegation against a `by-delegator` delegation list.
///
/// The most recent on-chain undelegation of the delegation must carry the
/// issued amount and an epoch within one of the issuance epoch. Returns the
/// confirmation for the engine to apply; the reference is not touched.
pub fn confirm_undelegation(
    delegations: &Value,
    delegator: &Address,
    validator: &Address,
    issued: &UndelegationRecord,
) -> CheckResult<UndelegationConfirmation> {
    let subject = format!("delegation {} -> {}", delegator, validator);
    let observed = single_delegation(delegations, delegator, validator)?;
    let list = undelegations_of(observed).ok_or_else(|| missing(&subject, "undelegations"))?;
    let latest = list
        .as_array()
        .and_then(|items| items.last())
        .ok_or_else(|| missing(&subject, "undelegations"))?;

    let amount = field_ci(latest, "amount")
        .and_then(base_units_from_json)
        .ok_or_else(|| missing(&subject, "undelegations.amount"))?;
    let expected = to_base_units(issued.amount);
    if amount != expected {
        return Err(Mismatch::Field {
            subject,
            field: "undelegations.amount".to_string(),
            expected: expected.to_string(),
            observed: amount.to_string(),
        });
    }

    let epoch = field_ci(latest, "epoch")
        .and_then(epoch_from_json)
        .ok_or_else(|| missing(&subject, "undelegations.epoch"))?;
    let epoch_match = check_undelegation_epoch(issued.issued_epoch, epoch)?;

    Ok(UndelegationConfirmation {
        validator: validator.clone(),
        epoch,
        epoch_match,
        snapshot: list.clone(),
    })
}

fn single_delegation<'a>(delegations: &'a Value, delegator: &Address, validator: &Address) -> CheckResult<&'a Value> {
    let matching: Vec<&Value> = delegation_items(delegations)
        .filter(|d| {
            str_field(d, "delegator_address").is_some_and(|a| delegator.matches(a))
                && str_field(d, "validator_address").is_some_and(|a| validator.matches(a))
        })
        .collect();
    match matching.as_slice() {
        [only] => Ok(*only),
        _ => Err(Mismatch::DelegationCount {
            delegator: delegator.to_string(),
            validator: validator.to_string(),
            found: matching.len(),
        }),
    }
}

fn delegation_items(delegations: &Value) -> impl Iterator<Item = &Value> {
    delegations.as_array().into_iter().flatten()
}

fn undelegations_of(delegation: &Value) -> Option<&Value> {
    delegation
        .get("Undelegations")
        .or_else(|| delegation.get("undelegations"))
        .filter(|v| !v.is_null())
}

fn check_base_units(subject: &str, doc: &Value, field: &str, expected: u128) -> CheckResult {
    let observed = doc
        .get(field)
        .and_then(base_units_from_json)
        .ok_or_else(|| missing(subject, field))?;
    if observed == expected {
        Ok(())
    } else {
        Err(Mismatch::Field {
            subject: subject.to_string(),
            field: field.to_string(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        })
    }
}

fn missing(subject: &str, field: &str) -> Mismatch {
    Mismatch::MissingField {
        subject: subject.to_string(),
        field: field.to_string(),
    }
}

fn str_field<'a>(doc: &'a Value, field: &str) -> Option<&'a str> {
    doc.get(field).and_then(Value::as_str)
}

/// Field lookup accepting `Amount` as well as `amount`.
fn field_ci<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    doc.as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(field))
        .map(|(_, v)| v)
}

fn decimal_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn epoch_from_json(value: &Value) -> Option<Epoch> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}
