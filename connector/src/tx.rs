//! Decoded external-chain transaction models.
//!
//! A closed two-way union: the protocol supports UTXO-model and
//! nonce/account-model chains and nothing else. Every stage handler
//! matches exhaustively, so a third model cannot be added without
//! touching each of them — intentionally.

use harbor_types::{Amount, ExtAddress, ExtTxHash, UtxoRef};
use serde::{Deserialize, Serialize};

/// One consumed input of a UTXO transaction, with the amount resolved
/// from the caller-supplied UTXO references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vin {
    pub utxo: UtxoRef,
    pub amount: Amount,
    pub address: ExtAddress,
}

/// One produced output of a UTXO transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vout {
    pub address: ExtAddress,
    pub amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTx {
    pub hash: ExtTxHash,
    pub vins: Vec<Vin>,
    pub vouts: Vec<Vout>,
}

impl UtxoTx {
    /// The implied miner fee: inputs minus outputs. `None` if the
    /// transaction claims to create value out of nothing.
    pub fn cost_fee(&self) -> Option<Amount> {
        let vin_total: Amount = self.vins.iter().map(|v| v.amount).sum();
        let vout_total: Amount = self.vouts.iter().map(|v| v.amount).sum();
        vin_total.checked_sub(vout_total)
    }

    pub fn vin_refs(&self) -> Vec<UtxoRef> {
        self.vins.iter().map(|v| v.utxo.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTx {
    pub hash: ExtTxHash,
    pub from: ExtAddress,
    pub to: ExtAddress,
    pub amount: Amount,
    pub nonce: u64,
    pub gas_price: Amount,
    pub gas_limit: u64,
    /// Token contract for contract-token transfers; `None` for the native
    /// asset.
    pub contract: Option<ExtAddress>,
}

impl AccountTx {
    /// Declared cost ceiling: `gas_price × gas_limit`.
    pub fn cost_limit(&self) -> Option<Amount> {
        self.gas_price.checked_mul(self.gas_limit as u128)
    }
}

/// A decoded external transaction of either model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtTransaction {
    Utxo(UtxoTx),
    Account(AccountTx),
}

impl ExtTransaction {
    pub fn hash(&self) -> &ExtTxHash {
        match self {
            Self::Utxo(tx) => &tx.hash,
            Self::Account(tx) => &tx.hash,
        }
    }
}

/// Estimated signed size in bytes of a UTXO transaction with the given
/// input/output counts (P2PKH weights). The fee-rate band is enforced
/// against this estimate, since the real size is only known once signed.
pub fn signed_size_estimate(vins: usize, vouts: usize) -> u64 {
    148 * vins as u64 + 34 * vouts as u64 + 10
}

/// Fee rate in raw units per 1000 bytes.
pub fn fee_rate_per_kb(cost_fee: Amount, size_bytes: u64) -> Amount {
    if size_bytes == 0 {
        return Amount::ZERO;
    }
    Amount::new(cost_fee.raw() * 1000 / size_bytes as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vin(amount: u128) -> Vin {
        Vin {
            utxo: UtxoRef::new(ExtTxHash::new("aa"), 0),
            amount: Amount::new(amount),
            address: ExtAddress::new("1In"),
        }
    }

    #[test]
    fn cost_fee_is_inputs_minus_outputs() {
        let tx = UtxoTx {
            hash: ExtTxHash::new("tx"),
            vins: vec![vin(1000), vin(500)],
            vouts: vec![Vout {
                address: ExtAddress::new("1Out"),
                amount: Amount::new(1400),
            }],
        };
        assert_eq!(tx.cost_fee(), Some(Amount::new(100)));
    }

    #[test]
    fn negative_fee_is_none() {
        let tx = UtxoTx {
            hash: ExtTxHash::new("tx"),
            vins: vec![vin(100)],
            vouts: vec![Vout {
                address: ExtAddress::new("1Out"),
                amount: Amount::new(200),
            }],
        };
        assert_eq!(tx.cost_fee(), None);
    }

    #[test]
    fn size_estimate_scales_with_io() {
        assert_eq!(signed_size_estimate(1, 1), 192);
        assert_eq!(signed_size_estimate(3, 2), 522);
    }

    #[test]
    fn fee_rate_per_kb_examples() {
        assert_eq!(fee_rate_per_kb(Amount::new(192), 192), Amount::new(1000));
        assert_eq!(fee_rate_per_kb(Amount::new(100), 0), Amount::ZERO);
    }
}
