use serde::{Deserialize, Serialize};
use std::fmt;

/// Account address as printed by the wallet CLI and the node RPC.
///
/// The test driver never decodes addresses; it only compares them, so the
/// bech32 text form is kept as-is.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap an address string, trimming surrounding whitespace.
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_string())
    }

    /// Borrow the address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the address is empty (the CLI prints nothing for unknown names).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare against a raw string taken from a JSON document.
    ///
    /// Bech32 text is case-insensitive, so case is ignored.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_trims_cli_output() {
        let addr = Address::new("one1ghkz3frhske7emk79p7v2afmj4a5t0kmjyt4s5\n");
        assert_eq!(addr.as_str(), "one1ghkz3frhske7emk79p7v2afmj4a5t0kmjyt4s5");
        assert!(addr.matches(" one1ghkz3frhske7emk79p7v2afmj4a5t0kmjyt4s5"));
    }

    #[test]
    fn test_address_matches_ignoring_case() {
        let addr = Address::new("one1ghkz3frhske7emk79p7v2afmj4a5t0kmjyt4s5");
        assert!(addr.matches("ONE1GHKZ3FRHSKE7EMK79P7V2AFMJ4A5T0KMJYT4S5"));
        assert!(!addr.matches("one1ghkz3frhske7emk79p7v2afmj4a5t0kmjyt4s6"));
    }

    #[test]
    fn test_address_serde_is_transparent() {
        let addr = Address::from("one1abc");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"one1abc\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
