use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid external address {addr} for chain {chain}")]
    InvalidAddress { chain: String, addr: String },

    #[error("transaction decode failed: {0}")]
    DecodeFailed(String),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("referenced utxo not supplied: {0}")]
    MissingUtxoRef(String),
}
