//! The external-chain connector boundary.
//!
//! Everything the custody protocol knows about an external chain goes
//! through [`ChainConnector`]: canonicalizing addresses, rebuilding and
//! decoding transactions, and checking signatures. All of these are
//! side-effect-free — broadcast happens off-chain, outside the
//! deterministic state machine, and is deliberately absent here.

pub mod error;
pub mod mock;
pub mod tx;

pub use error::ConnectorError;
pub use mock::MockConnector;
pub use tx::{
    fee_rate_per_kb, signed_size_estimate, AccountTx, ExtTransaction, UtxoTx, Vin, Vout,
};

use harbor_types::{Chain, ExtAddress, Symbol, UtxoRef};

pub trait ChainConnector {
    /// Validate and canonicalize an external address.
    fn validate_address(
        &self,
        chain: &Chain,
        symbol: &Symbol,
        addr: &str,
    ) -> Result<ExtAddress, ConnectorError>;

    /// Build unsigned transaction bytes from stated parameters. Used by
    /// proposing validators off-chain; the state machine itself only ever
    /// decodes and compares.
    fn build_unsigned(
        &self,
        chain: &Chain,
        symbol: &Symbol,
        tx: &ExtTransaction,
    ) -> Result<Vec<u8>, ConnectorError>;

    /// Decode unsigned transaction bytes. For UTXO chains the caller
    /// supplies the referenced UTXOs so input amounts can be resolved.
    fn decode_raw(
        &self,
        chain: &Chain,
        symbol: &Symbol,
        raw: &[u8],
        utxo_refs: &[UtxoRef],
    ) -> Result<ExtTransaction, ConnectorError>;

    /// Decode signed transaction bytes; the returned transaction carries
    /// the external hash the chain will know it by.
    fn decode_signed(
        &self,
        chain: &Chain,
        symbol: &Symbol,
        signed: &[u8],
        utxo_refs: &[UtxoRef],
    ) -> Result<ExtTransaction, ConnectorError>;

    /// Check the signatures on signed transaction bytes against the
    /// expected signing addresses.
    fn verify_signature(
        &self,
        chain: &Chain,
        symbol: &Symbol,
        from_addrs: &[ExtAddress],
        signed: &[u8],
        utxo_refs: &[UtxoRef],
    ) -> Result<bool, ConnectorError>;
}
