//! External-chain UTXO reference.

use crate::ExtTxHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one unspent output on a UTXO chain: `(creating tx, vout index)`.
///
/// Account chains reuse this shape with a synthetic index of 0 where a
/// per-credit identifier is needed (deposit items).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UtxoRef {
    pub hash: ExtTxHash,
    pub index: u64,
}

impl UtxoRef {
    pub fn new(hash: ExtTxHash, index: u64) -> Self {
        Self { hash, index }
    }
}

impl fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}
