use harbor_connector::ConnectorError;
use harbor_ledger::LedgerError;
use harbor_orders::{OrderError, OrderId, OrderStatus};
use harbor_store::StoreError;
use harbor_types::{Amount, CuAddress, Symbol, ValidatorAddress};
use harbor_votes::VoteError;
use thiserror::Error;

/// Every rejection the protocol can produce.
///
/// Rejections are deterministic — every validator computes the same one
/// for the same message — and never leave partial state behind.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // ── Token / configuration ────────────────────────────────────────────
    #[error("unknown token: {0}")]
    TokenNotFound(Symbol),

    #[error("token type not supported for this operation")]
    UnsupportedTokenType,

    #[error("deposits are disabled for token {0}")]
    DepositDisabled(Symbol),

    #[error("withdrawals are disabled for token {0}")]
    WithdrawalDisabled(Symbol),

    // ── Input validation ─────────────────────────────────────────────────
    #[error("amount {amount} below deposit threshold {threshold}")]
    BelowDepositThreshold { amount: Amount, threshold: Amount },

    #[error("declared gas fee {fee} below minimum withdrawal fee {minimum}")]
    BelowWithdrawalFee { fee: Amount, minimum: Amount },

    #[error("batch value {value} below collect threshold {threshold}")]
    BelowCollectThreshold { value: Amount, threshold: Amount },

    #[error("{0} is a home-ledger address; use direct transfer")]
    NotExternalAddress(String),

    #[error("external address {addr} does not belong to account {cu}")]
    AddressNotOwned { cu: CuAddress, addr: String },

    #[error("custodial unit not found: {0}")]
    CuNotFound(CuAddress),

    #[error("{0} is not a custodian")]
    NotCustodian(CuAddress),

    #[error("account {0} has no external address on this chain")]
    NoExtAddress(CuAddress),

    #[error("amount overflow")]
    Overflow,

    // ── Protocol sequence ────────────────────────────────────────────────
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("order {id} is {status}, not in the expected status")]
    UnexpectedStatus { id: OrderId, status: OrderStatus },

    #[error("order {0} has the wrong kind for this operation")]
    UnexpectedKind(OrderId),

    #[error("only the requesting account may cancel its withdrawal")]
    NotRequester,

    #[error("order batch is empty")]
    EmptyBatch,

    #[error("order batch of {len} exceeds the limit of {limit}")]
    BatchTooLarge { len: usize, limit: usize },

    #[error("orders in the batch disagree: {0}")]
    BatchMismatch(String),

    #[error("conflicting proposal for order {0}: different transaction already accepted")]
    ConflictingProposal(OrderId),

    // ── Transaction verification ─────────────────────────────────────────
    #[error("proposed transaction does not restate the batch: {0}")]
    TxMismatch(String),

    #[error("implied fee rate {rate_bps} bps of configured price outside [{lower_bps}, {upper_bps}]")]
    FeeOutOfBand {
        rate_bps: u128,
        lower_bps: u32,
        upper_bps: u32,
    },

    #[error("realized fee share {share} exceeds order {id} gas ceiling {ceiling}")]
    FeeExceedsCeiling {
        id: OrderId,
        share: Amount,
        ceiling: Amount,
    },

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("transaction model does not match the token's chain model")]
    WrongTxModel,

    #[error("external address {0} has a transaction in flight")]
    SendDisabled(String),

    // ── Votes ────────────────────────────────────────────────────────────
    #[error("{0} is not an active validator")]
    NotValidator(ValidatorAddress),

    #[error("vote box for this id has a different flavor")]
    WrongVoteBoxKind,

    #[error("finish report does not match the signed transaction: {0}")]
    InvalidFinish(String),

    // ── SysTransfer / migration / retry ──────────────────────────────────
    #[error("address still has sufficient gas")]
    GasNotNeeded,

    #[error("asset {symbol} of {cu} already migrated")]
    AlreadyMigrated { cu: CuAddress, symbol: Symbol },

    #[error("retry round {requested} not current ({current}) or next")]
    RetryRoundMismatch { requested: u32, current: u32 },

    #[error("retry limit reached")]
    RetryLimitReached,

    #[error("stated stuck set does not match the recomputed set")]
    StuckSetMismatch,

    // ── Wrapped lower layers ─────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}
