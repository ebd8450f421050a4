//! Collect order: sweep one confirmed deposit into its custodian.
//!
//! A collect order is created by the deposit handler, one per external
//! credit. Collection itself runs over a *batch* of collect orders whose
//! deposit items all sit on the same chain and are destined for the same
//! custodian address; the batch advances through WaitSign/SignFinish/Finish
//! together.

use crate::status::DepositConfirmStatus;
use crate::OrderHeader;
use harbor_types::{Amount, CuAddress, ExtAddress, ExtTxHash};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectOrder {
    pub header: OrderHeader,

    /// Depositor account whose external credit is being swept.
    pub from_cu: CuAddress,
    /// External deposit address the credit landed on.
    pub from_addr: ExtAddress,
    /// Custodian the funds are being collected into.
    pub to_cu: CuAddress,

    /// The external credit this order tracks.
    pub amount: Amount,
    pub deposit_hash: ExtTxHash,
    pub deposit_index: u64,

    pub deposit_status: DepositConfirmStatus,
}
