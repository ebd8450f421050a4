//! External-chain token metadata.
//!
//! A `TokenInfo` describes one custodied asset: which external chain it
//! lives on, the chain's transaction model, gas pricing, and the protocol
//! thresholds that gate deposits and collection. Token metadata is
//! read-only input to the order protocol — it never changes during a
//! single order's lifetime.

use crate::{Amount, ExtAddress};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An asset symbol, e.g. `btc`, `eth`, `usdt`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An external chain identifier, e.g. `btc`, `eth`.
///
/// Distinct from [`Symbol`]: several tokens (a chain's native asset plus
/// its contract tokens) can share one chain.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Chain(String);

impl Chain {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The transaction model of a token's external chain.
///
/// A closed three-way variant on purpose: a new chain model requires
/// matching, reviewed code in every protocol stage, and exhaustive
/// pattern matching makes the compiler point at every such place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    /// Bitcoin-style: transactions consume discrete unspent outputs.
    UtxoBased,
    /// Ethereum-style: transactions debit a nonce-sequenced account.
    AccountBased,
    /// Declared but not supported; every protocol operation rejects it.
    AccountSharedBased,
}

/// Metadata for one custodied token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: Symbol,
    pub chain: Chain,
    pub token_type: TokenType,

    /// Contract address for account-chain contract tokens; `None` for the
    /// chain's native asset and for UTXO tokens.
    pub contract: Option<ExtAddress>,

    /// Configured gas price. UTXO chains: raw units per 1000 bytes of
    /// signed transaction. Account chains: raw units per gas.
    pub gas_price: Amount,

    /// Gas limit for one account-chain transaction of this token.
    pub gas_limit: u64,

    /// Minimum single deposit the protocol accepts.
    pub deposit_threshold: Amount,

    /// Minimum batch value before deposit items are worth collecting.
    pub collect_threshold: Amount,

    /// Minimum gas fee a withdrawal request must declare.
    pub withdrawal_fee: Amount,

    pub deposit_enabled: bool,
    pub withdrawal_enabled: bool,
    pub send_enabled: bool,
}

impl TokenInfo {
    /// Declared cost ceiling of one account-chain transaction.
    pub fn account_tx_cost(&self) -> Option<Amount> {
        self.gas_price.checked_mul(self.gas_limit as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_lowercases() {
        assert_eq!(Symbol::new("BTC").as_str(), "btc");
        assert_eq!(Symbol::new("btc"), Symbol::new("Btc"));
    }

    #[test]
    fn account_tx_cost_multiplies() {
        let token = TokenInfo {
            symbol: Symbol::new("eth"),
            chain: Chain::new("eth"),
            token_type: TokenType::AccountBased,
            contract: None,
            gas_price: Amount::new(1_000),
            gas_limit: 21_000,
            deposit_threshold: Amount::ZERO,
            collect_threshold: Amount::ZERO,
            withdrawal_fee: Amount::ZERO,
            deposit_enabled: true,
            withdrawal_enabled: true,
            send_enabled: true,
        };
        assert_eq!(token.account_tx_cost(), Some(Amount::new(21_000_000)));
    }
}
