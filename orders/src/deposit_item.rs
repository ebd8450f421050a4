//! Recorded external-chain credits.

use crate::status::DepositItemStatus;
use harbor_types::{Amount, ExtAddress, ExtTxHash, UtxoRef};
use serde::{Deserialize, Serialize};

/// One external-chain credit: a UTXO, or a synthetic index-0 item on
/// account chains.
///
/// Keyed in storage by `(symbol, owner, hash, index)` and created at most
/// once per key. Custodian-owned items with status `Confirmed` double as
/// the custodian's spendable UTXO set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepositItem {
    pub hash: ExtTxHash,
    pub index: u64,
    pub amount: Amount,
    /// External address the credit landed on.
    pub ext_address: ExtAddress,
    pub status: DepositItemStatus,
}

impl DepositItem {
    pub fn utxo_ref(&self) -> UtxoRef {
        UtxoRef::new(self.hash.clone(), self.index)
    }
}
