//! Withdrawal order: pay out a user's funds to an external address.

use crate::status::WithdrawStatus;
use crate::OrderHeader;
use harbor_types::{Amount, CuAddress, ExtAddress, UtxoRef};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalOrder {
    pub header: OrderHeader,

    /// External destination. Never a home-ledger account — those use
    /// direct transfer.
    pub to_addr: ExtAddress,

    /// Principal the user receives externally.
    pub amount: Amount,
    /// User-declared gas ceiling, locked together with the principal.
    pub gas_fee: Amount,

    pub withdraw_status: WithdrawStatus,

    /// Custodian assigned at WaitSign; empty-string address until then is
    /// avoided by making it optional.
    pub opcu: Option<CuAddress>,
    /// Custodian UTXOs consumed by the proposed transaction (UTXO chains).
    pub utxo_vins: Vec<UtxoRef>,
}
