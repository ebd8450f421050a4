//! Order and deposit-item status enums with their transition rules.
//!
//! An order's status is monotonic: it only moves forward under the ordering
//! Begin < WaitSign < SignFinish < terminal, with no skipped stage.
//! Withdrawal and sys-transfer orders may branch from a non-terminal stage
//! to Cancel or Failed; nothing ever leaves a terminal status.

use crate::OrderError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status shared by every order kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Begin,
    WaitSign,
    SignFinish,
    Finish,
    Cancel,
    Failed,
    Expired,
}

impl OrderStatus {
    /// Whether the order has left the in-flight index for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finish | Self::Cancel | Self::Failed | Self::Expired
        )
    }

    /// Position in the forward ordering; terminal statuses share a rank.
    fn rank(&self) -> u8 {
        match self {
            Self::Begin => 0,
            Self::WaitSign => 1,
            Self::SignFinish => 2,
            Self::Finish | Self::Cancel | Self::Failed | Self::Expired => 3,
        }
    }

    /// Check a proposed transition.
    ///
    /// Forward moves advance exactly one stage; the terminal branches
    /// (Cancel, Failed, Expired) are reachable from any non-terminal
    /// stage. A retry rewind (back to Begin) does not go through here —
    /// it is the one sanctioned exception, applied by the retry handler.
    pub fn check_advance(&self, to: OrderStatus) -> Result<(), OrderError> {
        let ok = if to.is_terminal() {
            !self.is_terminal()
        } else {
            to.rank() == self.rank() + 1
        };
        if ok {
            Ok(())
        } else {
            Err(OrderError::InvalidStatusTransition {
                from: *self,
                to,
            })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Begin => "begin",
            Self::WaitSign => "wait-sign",
            Self::SignFinish => "sign-finish",
            Self::Finish => "finish",
            Self::Cancel => "cancel",
            Self::Failed => "failed",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Quorum-confirmation state of a deposit recorded on its collect order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositConfirmStatus {
    Unconfirmed,
    Confirmed,
}

/// Quorum-confirmation state of a withdrawal request.
///
/// UTXO withdrawals start `Valid` (nothing external to confirm);
/// account-chain withdrawals start `Unconfirmed` and are voted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawStatus {
    Unconfirmed,
    Valid,
}

/// Status of one recorded external-chain credit.
///
/// `WaitCollect → InProcess → Confirmed`; InProcess reverts to WaitCollect
/// only through an explicit retry rewind, never automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositItemStatus {
    WaitCollect,
    InProcess,
    Confirmed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(OrderStatus::Begin.check_advance(OrderStatus::WaitSign).is_ok());
        assert!(OrderStatus::WaitSign
            .check_advance(OrderStatus::SignFinish)
            .is_ok());
        assert!(OrderStatus::SignFinish
            .check_advance(OrderStatus::Finish)
            .is_ok());
    }

    #[test]
    fn skipping_a_stage_rejected() {
        assert!(OrderStatus::Begin
            .check_advance(OrderStatus::SignFinish)
            .is_err());
    }

    #[test]
    fn backward_transition_rejected() {
        assert!(OrderStatus::SignFinish
            .check_advance(OrderStatus::WaitSign)
            .is_err());
        assert!(OrderStatus::WaitSign
            .check_advance(OrderStatus::WaitSign)
            .is_err());
    }

    #[test]
    fn terminal_branches_from_any_live_stage() {
        assert!(OrderStatus::Begin.check_advance(OrderStatus::Cancel).is_ok());
        assert!(OrderStatus::WaitSign
            .check_advance(OrderStatus::Failed)
            .is_ok());
        assert!(OrderStatus::SignFinish
            .check_advance(OrderStatus::Expired)
            .is_ok());
    }

    #[test]
    fn nothing_leaves_terminal() {
        assert!(OrderStatus::Finish
            .check_advance(OrderStatus::Cancel)
            .is_err());
        assert!(OrderStatus::Cancel
            .check_advance(OrderStatus::Finish)
            .is_err());
    }
}
