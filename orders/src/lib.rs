//! Custodial order types.
//!
//! Order kinds:
//! - **Collect**: sweep a confirmed deposit into its custodian
//! - **Withdrawal**: pay out a user's funds to an external address
//! - **SysTransfer**: protocol-initiated gas top-up (account chains)
//! - **OpcuAssetTransfer**: custodian-to-custodian migration at epoch change
//!
//! The four kinds share a common header and differ only in payload, so the
//! whole family is one tagged union dispatched by kind at the boundary.
//! Orders are created once in `Begin` and only progress forward through
//! the status enum; a terminal order is removed from the in-flight index
//! but never physically deleted.

pub mod asset_transfer;
pub mod collect;
pub mod deposit_item;
pub mod error;
pub mod status;
pub mod sys_transfer;
pub mod withdrawal;

pub use asset_transfer::{OpcuAssetTransferOrder, TransferItems, TransferUtxo};
pub use collect::CollectOrder;
pub use deposit_item::DepositItem;
pub use error::OrderError;
pub use status::{DepositConfirmStatus, DepositItemStatus, OrderStatus, WithdrawStatus};
pub use sys_transfer::SysTransferOrder;
pub use withdrawal::WithdrawalOrder;

use harbor_types::{Amount, BlockHeight, CuAddress, ExtTxHash, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally supplied, globally unique order identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    /// Order IDs are caller-chosen strings; cap their length so composite
    /// store keys stay bounded.
    pub const MAX_LEN: usize = 64;

    pub fn new(raw: impl Into<String>) -> Result<Self, OrderError> {
        let s = raw.into();
        if s.is_empty() || s.len() > Self::MAX_LEN || s.contains(',') {
            return Err(OrderError::InvalidOrderId(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant of the order union, used for in-flight index keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Collect,
    Withdrawal,
    SysTransfer,
    OpcuAssetTransfer,
}

impl OrderKind {
    /// Stable one-byte tag for composite store keys.
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Collect => 0x01,
            Self::Withdrawal => 0x02,
            Self::SysTransfer => 0x03,
            Self::OpcuAssetTransfer => 0x04,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collect => "collect",
            Self::Withdrawal => "withdrawal",
            Self::SysTransfer => "sys-transfer",
            Self::OpcuAssetTransfer => "opcu-asset-transfer",
        };
        write!(f, "{s}")
    }
}

/// Fields every order carries regardless of kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderHeader {
    pub order_id: OrderId,
    /// Owning account: the depositor for collect, the requester for
    /// withdrawal, the funding custodian for the system kinds.
    pub cu_address: CuAddress,
    pub symbol: Symbol,
    pub status: OrderStatus,

    /// Unsigned external transaction bytes, empty until WaitSign.
    pub raw_data: Vec<u8>,
    /// Signed external transaction bytes, empty until SignFinish.
    pub signed_tx: Vec<u8>,
    /// External hash of the signed transaction, empty until SignFinish.
    pub ext_tx_hash: Option<ExtTxHash>,
    /// Realized external cost, set at Finish.
    pub cost_fee: Amount,

    /// Home-ledger height the order was created at.
    pub height: BlockHeight,
    /// Completed retry rounds for this order's stuck batch.
    pub retry_times: u32,
}

impl OrderHeader {
    pub fn new(
        order_id: OrderId,
        cu_address: CuAddress,
        symbol: Symbol,
        height: BlockHeight,
    ) -> Self {
        Self {
            order_id,
            cu_address,
            symbol,
            status: OrderStatus::Begin,
            raw_data: Vec::new(),
            signed_tx: Vec::new(),
            ext_tx_hash: None,
            cost_fee: Amount::ZERO,
            height,
            retry_times: 0,
        }
    }

    /// Drop WaitSign/SignFinish artifacts for a retry rewind.
    pub fn reset_for_retry(&mut self) {
        self.status = OrderStatus::Begin;
        self.raw_data.clear();
        self.signed_tx.clear();
        self.ext_tx_hash = None;
        self.retry_times += 1;
    }
}

/// The unified order union wrapping all custodial order kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Order {
    Collect(CollectOrder),
    Withdrawal(WithdrawalOrder),
    SysTransfer(SysTransferOrder),
    OpcuAssetTransfer(OpcuAssetTransferOrder),
}

impl Order {
    pub fn kind(&self) -> OrderKind {
        match self {
            Self::Collect(_) => OrderKind::Collect,
            Self::Withdrawal(_) => OrderKind::Withdrawal,
            Self::SysTransfer(_) => OrderKind::SysTransfer,
            Self::OpcuAssetTransfer(_) => OrderKind::OpcuAssetTransfer,
        }
    }

    pub fn header(&self) -> &OrderHeader {
        match self {
            Self::Collect(o) => &o.header,
            Self::Withdrawal(o) => &o.header,
            Self::SysTransfer(o) => &o.header,
            Self::OpcuAssetTransfer(o) => &o.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut OrderHeader {
        match self {
            Self::Collect(o) => &mut o.header,
            Self::Withdrawal(o) => &mut o.header,
            Self::SysTransfer(o) => &mut o.header,
            Self::OpcuAssetTransfer(o) => &mut o.header,
        }
    }

    pub fn id(&self) -> &OrderId {
        &self.header().order_id
    }

    pub fn status(&self) -> OrderStatus {
        self.header().status
    }

    /// Advance the order's status, enforcing the monotonic transition
    /// rules of [`OrderStatus::check_advance`].
    pub fn advance(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        self.header().status.check_advance(to)?;
        self.header_mut().status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_types::ExtAddress;

    fn withdrawal(id: &str) -> Order {
        Order::Withdrawal(WithdrawalOrder {
            header: OrderHeader::new(
                OrderId::new(id).unwrap(),
                CuAddress::new("hrb1user"),
                Symbol::new("btc"),
                10,
            ),
            to_addr: ExtAddress::new("1BvBM"),
            amount: Amount::new(1000),
            gas_fee: Amount::new(50),
            withdraw_status: WithdrawStatus::Valid,
            opcu: None,
            utxo_vins: Vec::new(),
        })
    }

    #[test]
    fn order_id_rejects_empty_and_oversized() {
        assert!(OrderId::new("").is_err());
        assert!(OrderId::new("a".repeat(65)).is_err());
        assert!(OrderId::new("a,b").is_err());
        assert!(OrderId::new("order-1").is_ok());
    }

    #[test]
    fn new_order_starts_in_begin() {
        let o = withdrawal("w1");
        assert_eq!(o.status(), OrderStatus::Begin);
        assert_eq!(o.kind(), OrderKind::Withdrawal);
        assert!(o.header().raw_data.is_empty());
    }

    #[test]
    fn advance_enforces_monotonic_order() {
        let mut o = withdrawal("w1");
        o.advance(OrderStatus::WaitSign).unwrap();
        assert!(o.advance(OrderStatus::Finish).is_err());
        o.advance(OrderStatus::SignFinish).unwrap();
        o.advance(OrderStatus::Finish).unwrap();
        assert!(o.advance(OrderStatus::Cancel).is_err());
    }

    #[test]
    fn reset_for_retry_clears_artifacts() {
        let mut o = withdrawal("w1");
        o.advance(OrderStatus::WaitSign).unwrap();
        o.header_mut().raw_data = vec![1, 2, 3];
        o.header_mut().reset_for_retry();
        assert_eq!(o.status(), OrderStatus::Begin);
        assert!(o.header().raw_data.is_empty());
        assert_eq!(o.header().retry_times, 1);
    }

    #[test]
    fn kind_bytes_are_distinct() {
        let kinds = [
            OrderKind::Collect,
            OrderKind::Withdrawal,
            OrderKind::SysTransfer,
            OrderKind::OpcuAssetTransfer,
        ];
        for a in &kinds {
            for b in &kinds {
                if a != b {
                    assert_ne!(a.as_byte(), b.as_byte());
                }
            }
        }
    }
}
