//! Parsing of wallet CLI output.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, WalletError};

/// Response of a submitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResponse {
    /// Receipt (a hash, or the full receipt when confirmation was awaited)
    pub receipt: Value,
    /// Whole JSON document printed by the CLI
    pub raw: Value,
}

impl TransactionResponse {
    /// Receipt as a transaction hash, when it is one.
    pub fn hash(&self) -> Option<&str> {
        match &self.receipt {
            Value::String(hash) => Some(hash),
            Value::Object(map) => map.get("transactionHash").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Balance of an account on one shard.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShardBalance {
    /// Shard number
    pub shard: u32,
    /// Balance in whole tokens
    pub amount: f64,
}

/// Parse output that must be a JSON document.
///
/// Output is trimmed first; when the CLI prefixes the document with log
/// lines, parsing falls back to the outermost `{ ... }` or `[ ... ]` span.
pub fn parse_json_output(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(first) => outermost_json(trimmed)
            .and_then(|span| serde_json::from_str(span).ok())
            .ok_or_else(|| WalletError::InvalidJson {
                reason: first.to_string(),
                output: trimmed.to_string(),
            }),
    }
}

fn outermost_json(text: &str) -> Option<&str> {
    let object = text.find('{').zip(text.rfind('}'));
    let array = text.find('[').zip(text.rfind(']'));
    let (start, end) = match (object, array) {
        (Some(o), Some(a)) => {
            if o.0 <= a.0 {
                o
            } else {
                a
            }
        }
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    (start < end).then(|| &text[start..=end])
}

/// Parse the JSON printed after submitting a transaction.
///
/// A missing or null `transaction-receipt` is a protocol violation.
pub fn parse_transaction_response(text: &str) -> Result<TransactionResponse> {
    let raw = parse_json_output(text)?;
    match raw.get("transaction-receipt") {
        Some(receipt) if !receipt.is_null() => Ok(TransactionResponse {
            receipt: receipt.clone(),
            raw,
        }),
        _ => Err(WalletError::MissingReceipt(raw.to_string())),
    }
}

/// Parse `balances` output.
pub fn parse_balances(text: &str) -> Result<Vec<ShardBalance>> {
    let value = parse_json_output(text)?;
    serde_json::from_value(value.clone()).map_err(|e| WalletError::InvalidJson {
        reason: e.to_string(),
        output: value.to_string(),
    })
}

/// Parse `keys list` output into `(name, address)` pairs.
///
/// ```text
/// NAME                                ADDRESS
///
/// default                             one1...
/// ```
pub fn parse_key_list(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let address = parts.last()?;
            (name != "NAME").then(|| (name.to_string(), address.to_string()))
        })
        .collect()
}

/// Number of lines the dry-run transfer output has in supported CLI versions.
pub const DRY_RUN_LINES: usize = 17;
const RAW_TXN_PREFIX: &str = "RawTxn: ";

/// Extract the signed raw transaction from `transfer --dry-run` output.
pub fn parse_dry_run_raw_transaction(text: &str) -> Result<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() != DRY_RUN_LINES {
        return Err(WalletError::UnexpectedOutput(format!(
            "dry-run output has {} lines, expected {}; check the CLI version",
            lines.len(),
            DRY_RUN_LINES
        )));
    }
    let raw_line = lines[lines.len() - 2].trim();
    let raw = raw_line.strip_prefix(RAW_TXN_PREFIX).unwrap_or(raw_line);
    if raw.is_empty() {
        return Err(WalletError::UnexpectedOutput(
            "dry-run output has no raw transaction".to_string(),
        ));
    }
    Ok(raw.to_string())
}

/// Extract the numeric release from `version` output such as
/// `Harmony (C) 2020. hmy, version v321-d12a8ab (...)`.
pub fn parse_cli_version(text: &str) -> Option<u32> {
    let start = text.find("version v")? + "version v".len();
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_transaction_response() {
        let resp = parse_transaction_response("{\"transaction-receipt\": \"0xdead\"}\n").unwrap();
        assert_eq!(resp.hash(), Some("0xdead"));
    }

    #[test]
    fn test_transaction_response_with_log_prefix() {
        let text = "Unlocked key\n{\"transaction-receipt\": {\"transactionHash\": \"0xbeef\"}}";
        let resp = parse_transaction_response(text).unwrap();
        assert_eq!(resp.hash(), Some("0xbeef"));
    }

    #[test]
    fn test_missing_receipt_is_protocol_violation() {
        let err = parse_transaction_response("{\"transaction-receipt\": null}").unwrap_err();
        assert!(matches!(err, WalletError::MissingReceipt(_)));
        let err = parse_transaction_response("{\"error\": \"insufficient funds\"}").unwrap_err();
        assert!(matches!(err, WalletError::MissingReceipt(_)));
    }

    #[test]
    fn test_malformed_output_is_invalid_json() {
        let err = parse_transaction_response("commit failed").unwrap_err();
        assert!(matches!(err, WalletError::InvalidJson { .. }));
    }

    #[test]
    fn test_parse_balances() {
        let balances =
            parse_balances(r#"[{"shard": 0, "amount": 12.5}, {"shard": 1, "amount": 0}]"#).unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0], ShardBalance { shard: 0, amount: 12.5 });
        assert_eq!(parse_json_output("[1, 2]").unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_parse_key_list() {
        let text = "NAME                 ADDRESS\n\n\
                    default              one1aaa\n\
                    _Test_key_funding_0  one1bbb\n";
        let keys = parse_key_list(text);
        assert_eq!(
            keys,
            vec![
                ("default".to_string(), "one1aaa".to_string()),
                ("_Test_key_funding_0".to_string(), "one1bbb".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_dry_run() {
        let mut lines: Vec<String> = (0..15).map(|i| format!("line {}", i)).collect();
        lines.push("RawTxn: 0xf86d80843b9aca00".to_string());
        lines.push(String::new());
        let text = lines.join("\n");
        assert_eq!(parse_dry_run_raw_transaction(&text).unwrap(), "0xf86d80843b9aca00");

        let err = parse_dry_run_raw_transaction("RawTxn: 0x00\n").unwrap_err();
        assert!(matches!(err, WalletError::UnexpectedOutput(_)));
    }

    #[test]
    fn test_parse_cli_version() {
        assert_eq!(
            parse_cli_version("Harmony (C) 2020. hmy, version v321-d12a8ab (runner@host 2020-03-01)"),
            Some(321)
        );
        assert_eq!(parse_cli_version("hmy, version v170-"), Some(170));
        assert_eq!(parse_cli_version("no version here"), None);
    }
}
