//! Protocol parameters.
//!
//! Everything here is a tunable protocol constant, not a compile-time
//! constant: the gas-price acceptance band, batch limits, and the
//! sys-transfer sizing multiples are governance inputs that must be
//! changeable without recompiling. Defaults preserve the ratios the
//! protocol has always shipped with.

use serde::{Deserialize, Serialize};

/// All custody-protocol parameters stored by every node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolParams {
    // ── Gas-price acceptance band ────────────────────────────────────────
    /// Lower bound on a proposed transaction's implied fee rate, in basis
    /// points of the token's configured gas price. Default 8000 (0.8×).
    pub price_lower_bound_bps: u32,

    /// Upper bound on a proposed transaction's implied fee rate, in basis
    /// points of the token's configured gas price. Default 12000 (1.2×).
    pub price_upper_bound_bps: u32,

    // ── Batching ─────────────────────────────────────────────────────────
    /// Maximum withdrawal orders batched into one UTXO transaction
    /// (the max-vout limit). Account chains always batch exactly one.
    pub max_vout_limit: u32,

    /// Maximum deposit items swept by one collect transaction.
    pub max_collect_items: u32,

    // ── SysTransfer sizing ───────────────────────────────────────────────
    /// Gas top-up for a user deposit address, as a multiple of one
    /// account transaction's declared cost (`gas_price × gas_limit`).
    pub sys_transfer_gas_multiple: u128,

    /// Gas top-up for a custodian address, as the same multiple.
    pub opcu_sys_transfer_gas_multiple: u128,

    // ── Housekeeping ─────────────────────────────────────────────────────
    /// Vote boxes recorded below `current_height - this` may be pruned.
    pub vote_retention_heights: u64,

    /// Maximum retry rounds for one stuck order batch.
    pub max_order_retry_times: u32,
}

impl ProtocolParams {
    /// The shipped defaults — 0.8×–1.2× price band, 16-output batches.
    pub fn harbor_defaults() -> Self {
        Self {
            price_lower_bound_bps: 8_000,
            price_upper_bound_bps: 12_000,
            max_vout_limit: 16,
            max_collect_items: 16,
            sys_transfer_gas_multiple: 2,
            opcu_sys_transfer_gas_multiple: 10,
            vote_retention_heights: 10_000,
            max_order_retry_times: 5,
        }
    }

    /// Load parameters from a TOML document, e.g. a node's config file.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self::harbor_defaults()
    }
}
