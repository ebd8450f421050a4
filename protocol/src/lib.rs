//! The custodial order protocol.
//!
//! A quorum of validators jointly custodies assets on external chains on
//! behalf of home-ledger accounts. Five order families drive the custody
//! ledger through their stages:
//!
//! - **Deposit / ConfirmedDeposit** — record an external credit, quorum-
//!   confirm it, credit the depositor
//! - **Collect** — sweep confirmed deposits into their custodian
//! - **Withdrawal** — pay user funds out to an external address
//! - **SysTransfer** — protocol-computed gas top-ups (account chains)
//! - **OpcuAssetTransfer** — whole-position custodian migration at epoch
//!   change
//!
//! All five share one stage shape: `Begin` reserves funds and creates the
//! order; `WaitSign` deterministically re-derives a proposed raw
//! transaction and fixes the order's parameters; `SignFinish` checks the
//! signature and pins the external hash; `Finish` is quorum-voted on the
//! realized cost and applies the ledger effects exactly once, protected
//! by the vote box's first-confirmed signal. Every stage is idempotent
//! and order-tolerant: restating accepted state is a no-op, conflicting
//! proposals are rejections, and rejections never mutate state.

pub mod asset_transfer;
pub mod collect;
pub mod deposit;
pub mod error;
pub mod external;
pub mod keeper;
pub mod retry;
pub mod sys_transfer;
pub mod withdrawal;

pub use error::ProtocolError;
pub use external::{BehaviourKeeper, Epoch, EpochKeeper};
pub use keeper::CustodyKeeper;
pub use retry::BEHAVIOUR_RETRY;
