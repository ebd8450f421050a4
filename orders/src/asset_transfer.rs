//! Asset-transfer order: custodian-to-custodian migration at epoch change.
//!
//! When the validator set rotates, every asset held by an outgoing
//! custodian migrates to its newly elected successor. Unlike the other
//! kinds, the payload is the custodian's *entire* position: all confirmed
//! UTXOs, or the whole account balance.

use crate::OrderHeader;
use harbor_types::{Amount, CuAddress, ExtAddress, UtxoRef};
use serde::{Deserialize, Serialize};

/// What is being migrated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferItems {
    /// Every confirmed UTXO of the outgoing custodian, itemized.
    Utxos(Vec<TransferUtxo>),
    /// The outgoing custodian's entire account-chain balance.
    Balance(Amount),
}

impl TransferItems {
    /// Total value carried by the migration.
    pub fn total(&self) -> Amount {
        match self {
            Self::Utxos(items) => items.iter().map(|i| i.amount).sum(),
            Self::Balance(amount) => *amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUtxo {
    pub utxo: UtxoRef,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpcuAssetTransferOrder {
    pub header: OrderHeader,

    /// Outgoing custodian (also the order's `cu_address`).
    pub from_cu: CuAddress,
    /// Newly elected custodian.
    pub to_cu: CuAddress,
    /// The successor's external address funds move to.
    pub to_addr: ExtAddress,

    pub items: TransferItems,
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_types::ExtTxHash;

    #[test]
    fn utxo_items_total_sums_amounts() {
        let items = TransferItems::Utxos(vec![
            TransferUtxo {
                utxo: UtxoRef::new(ExtTxHash::new("aa"), 0),
                amount: Amount::new(100),
            },
            TransferUtxo {
                utxo: UtxoRef::new(ExtTxHash::new("bb"), 1),
                amount: Amount::new(250),
            },
        ]);
        assert_eq!(items.total(), Amount::new(350));
    }

    #[test]
    fn balance_items_total_is_balance() {
        assert_eq!(
            TransferItems::Balance(Amount::new(7)).total(),
            Amount::new(7)
        );
    }
}
