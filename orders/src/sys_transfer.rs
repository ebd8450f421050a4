//! Sys-transfer order: protocol-initiated gas top-up on account chains.
//!
//! Moves a small, protocol-computed amount of a chain's native asset from
//! a custodian to an address that cannot otherwise pay for its own
//! collection or withdrawal.

use crate::OrderHeader;
use harbor_types::{Amount, CuAddress, ExtAddress};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SysTransferOrder {
    pub header: OrderHeader,

    /// Custodian fronting the gas.
    pub from_cu: CuAddress,
    /// Account that owns the destination external address.
    pub to_cu: CuAddress,
    /// External address receiving the gas.
    pub to_addr: ExtAddress,

    pub amount: Amount,
}
