//! Address types for the home ledger and for external chains.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A home-ledger custodial-unit address, always prefixed with `hrb`.
///
/// Both user accounts and protocol-controlled custodians (OPCUs) are
/// custodial units; the distinction lives in [`crate::token`]-independent
/// registry data, not in the address itself.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CuAddress(String);

impl CuAddress {
    /// The standard prefix for all harbor account addresses.
    pub const PREFIX: &'static str = "hrb";

    /// Create a new custodial-unit address from a raw string.
    ///
    /// # Panics
    /// Panics if the string does not start with `hrb`.
    pub fn new(raw: impl Into<String>) -> Self {
        let s = raw.into();
        assert!(s.starts_with(Self::PREFIX), "address must start with hrb");
        Self(s)
    }

    /// Return the raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate that this address is well-formed.
    pub fn is_valid(&self) -> bool {
        self.0.starts_with(Self::PREFIX) && self.0.len() > Self::PREFIX.len()
    }

    /// Whether an arbitrary string parses as a home-ledger address.
    ///
    /// Withdrawal destinations must NOT satisfy this — transfers between
    /// home accounts use direct transfer, not the custody protocol.
    pub fn looks_like(raw: &str) -> bool {
        raw.starts_with(Self::PREFIX) && raw.len() > Self::PREFIX.len()
    }
}

impl fmt::Display for CuAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CuAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A validator operator address on the home ledger.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorAddress(String);

impl ValidatorAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A canonicalized external-chain address.
///
/// The chain connector owns canonicalization; this type stores whatever
/// canonical form the connector returned and compares byte-for-byte.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtAddress(String);

impl ExtAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An external-chain transaction hash, in the chain's own printable form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtTxHash(String);

impl ExtTxHash {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExtTxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cu_address_accepts_prefixed() {
        let addr = CuAddress::new("hrb1qxy");
        assert!(addr.is_valid());
        assert_eq!(addr.as_str(), "hrb1qxy");
    }

    #[test]
    #[should_panic]
    fn cu_address_rejects_unprefixed() {
        CuAddress::new("cosmos1qxy");
    }

    #[test]
    fn looks_like_home_address() {
        assert!(CuAddress::looks_like("hrb1abcdef"));
        assert!(!CuAddress::looks_like("0xdeadbeef"));
        assert!(!CuAddress::looks_like("hrb"));
    }

    #[test]
    fn ext_address_compares_canonically() {
        let a = ExtAddress::new("0xABC");
        let b = ExtAddress::new("0xABC");
        let c = ExtAddress::new("0xabc");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
