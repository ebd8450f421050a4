//! A scripted connector for tests.
//!
//! Raw bytes are the bincode encoding of the transaction itself; signed
//! bytes wrap the transaction in an envelope naming its signers and
//! whether the signatures should verify. The external hash is a
//! deterministic digest of the signed bytes, so every validator in a test
//! derives the same hash, exactly as on a real chain.

use crate::tx::ExtTransaction;
use crate::{ChainConnector, ConnectorError};
use harbor_types::{Chain, ExtAddress, ExtTxHash, Symbol, UtxoRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug)]
struct AddrRule {
    prefixes: Vec<String>,
    lowercase: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SignedEnvelope {
    tx: ExtTransaction,
    signers: Vec<ExtAddress>,
    valid: bool,
}

pub struct MockConnector {
    rules: HashMap<String, AddrRule>,
}

impl MockConnector {
    /// A connector that knows a Bitcoin-shaped `btc` chain and an
    /// Ethereum-shaped `eth` chain.
    pub fn new() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            "btc".to_string(),
            AddrRule {
                prefixes: vec!["1".into(), "3".into(), "bc1".into()],
                lowercase: false,
            },
        );
        rules.insert(
            "eth".to_string(),
            AddrRule {
                prefixes: vec!["0x".into()],
                lowercase: true,
            },
        );
        Self { rules }
    }

    /// Encode a signed envelope, as the off-chain signing flow would.
    pub fn sign(tx: &ExtTransaction, signers: Vec<ExtAddress>, valid: bool) -> Vec<u8> {
        let mut tx = tx.clone();
        let unsigned = bincode::serialize(&tx).expect("mock tx serializes");
        let hash = Self::digest(&unsigned, &signers);
        match &mut tx {
            ExtTransaction::Utxo(t) => t.hash = hash,
            ExtTransaction::Account(t) => t.hash = hash,
        }
        bincode::serialize(&SignedEnvelope { tx, signers, valid }).expect("mock envelope serializes")
    }

    /// The external hash `sign` will stamp on a transaction.
    pub fn expected_hash(tx: &ExtTransaction, signers: &[ExtAddress]) -> ExtTxHash {
        let unsigned = bincode::serialize(tx).expect("mock tx serializes");
        Self::digest(&unsigned, signers)
    }

    /// FNV-1a over the unsigned bytes and signer list: stable, dependency
    /// free, and good enough to be collision-free within a test.
    fn digest(unsigned: &[u8], signers: &[ExtAddress]) -> ExtTxHash {
        let mut acc: u64 = 0xcbf29ce484222325;
        let mut eat = |bytes: &[u8]| {
            for b in bytes {
                acc ^= *b as u64;
                acc = acc.wrapping_mul(0x100000001b3);
            }
        };
        eat(unsigned);
        for s in signers {
            eat(s.as_str().as_bytes());
        }
        ExtTxHash::new(hex::encode(acc.to_be_bytes()))
    }

    fn check_refs(tx: &ExtTransaction, utxo_refs: &[UtxoRef]) -> Result<(), ConnectorError> {
        if let ExtTransaction::Utxo(utxo) = tx {
            for vin in &utxo.vins {
                if !utxo_refs.contains(&vin.utxo) {
                    return Err(ConnectorError::MissingUtxoRef(vin.utxo.to_string()));
                }
            }
        }
        Ok(())
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainConnector for MockConnector {
    fn validate_address(
        &self,
        chain: &Chain,
        _symbol: &Symbol,
        addr: &str,
    ) -> Result<ExtAddress, ConnectorError> {
        let rule = self
            .rules
            .get(chain.as_str())
            .ok_or_else(|| ConnectorError::UnsupportedChain(chain.to_string()))?;
        if !rule.prefixes.iter().any(|p| addr.starts_with(p.as_str())) {
            return Err(ConnectorError::InvalidAddress {
                chain: chain.to_string(),
                addr: addr.to_string(),
            });
        }
        let canonical = if rule.lowercase {
            addr.to_ascii_lowercase()
        } else {
            addr.to_string()
        };
        Ok(ExtAddress::new(canonical))
    }

    fn build_unsigned(
        &self,
        _chain: &Chain,
        _symbol: &Symbol,
        tx: &ExtTransaction,
    ) -> Result<Vec<u8>, ConnectorError> {
        bincode::serialize(tx).map_err(|e| ConnectorError::DecodeFailed(e.to_string()))
    }

    fn decode_raw(
        &self,
        _chain: &Chain,
        _symbol: &Symbol,
        raw: &[u8],
        utxo_refs: &[UtxoRef],
    ) -> Result<ExtTransaction, ConnectorError> {
        let tx: ExtTransaction =
            bincode::deserialize(raw).map_err(|e| ConnectorError::DecodeFailed(e.to_string()))?;
        Self::check_refs(&tx, utxo_refs)?;
        Ok(tx)
    }

    fn decode_signed(
        &self,
        _chain: &Chain,
        _symbol: &Symbol,
        signed: &[u8],
        utxo_refs: &[UtxoRef],
    ) -> Result<ExtTransaction, ConnectorError> {
        let envelope: SignedEnvelope = bincode::deserialize(signed)
            .map_err(|e| ConnectorError::DecodeFailed(e.to_string()))?;
        Self::check_refs(&envelope.tx, utxo_refs)?;
        Ok(envelope.tx)
    }

    fn verify_signature(
        &self,
        _chain: &Chain,
        _symbol: &Symbol,
        from_addrs: &[ExtAddress],
        signed: &[u8],
        _utxo_refs: &[UtxoRef],
    ) -> Result<bool, ConnectorError> {
        let envelope: SignedEnvelope = bincode::deserialize(signed)
            .map_err(|e| ConnectorError::DecodeFailed(e.to_string()))?;
        Ok(envelope.valid && from_addrs.iter().all(|a| envelope.signers.contains(a)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{AccountTx, UtxoTx, Vin, Vout};
    use harbor_types::Amount;

    fn sample_utxo_tx() -> ExtTransaction {
        ExtTransaction::Utxo(UtxoTx {
            hash: ExtTxHash::new(""),
            vins: vec![Vin {
                utxo: UtxoRef::new(ExtTxHash::new("prev"), 0),
                amount: Amount::new(1000),
                address: ExtAddress::new("1From"),
            }],
            vouts: vec![Vout {
                address: ExtAddress::new("1To"),
                amount: Amount::new(900),
            }],
        })
    }

    #[test]
    fn address_rules_per_chain() {
        let c = MockConnector::new();
        let btc = Chain::new("btc");
        let eth = Chain::new("eth");
        let sym = Symbol::new("btc");

        assert!(c.validate_address(&btc, &sym, "1Abc").is_ok());
        assert!(c.validate_address(&btc, &sym, "xyz").is_err());
        assert_eq!(
            c.validate_address(&eth, &sym, "0xABC").unwrap(),
            ExtAddress::new("0xabc")
        );
        assert!(c.validate_address(&Chain::new("doge"), &sym, "D123").is_err());
    }

    #[test]
    fn raw_roundtrip_requires_utxo_refs() {
        let c = MockConnector::new();
        let chain = Chain::new("btc");
        let sym = Symbol::new("btc");
        let tx = sample_utxo_tx();
        let raw = c.build_unsigned(&chain, &sym, &tx).unwrap();

        let refs = [UtxoRef::new(ExtTxHash::new("prev"), 0)];
        assert_eq!(c.decode_raw(&chain, &sym, &raw, &refs).unwrap(), tx);
        assert!(c.decode_raw(&chain, &sym, &raw, &[]).is_err());
    }

    #[test]
    fn sign_stamps_deterministic_hash() {
        let chain = Chain::new("eth");
        let sym = Symbol::new("eth");
        let c = MockConnector::new();
        let tx = ExtTransaction::Account(AccountTx {
            hash: ExtTxHash::new(""),
            from: ExtAddress::new("0xfrom"),
            to: ExtAddress::new("0xto"),
            amount: Amount::new(5),
            nonce: 0,
            gas_price: Amount::new(1),
            gas_limit: 21000,
            contract: None,
        });
        let signers = vec![ExtAddress::new("0xfrom")];
        let signed = MockConnector::sign(&tx, signers.clone(), true);
        let decoded = c.decode_signed(&chain, &sym, &signed, &[]).unwrap();
        assert_eq!(decoded.hash(), &MockConnector::expected_hash(&tx, &signers));
        assert!(c
            .verify_signature(&chain, &sym, &signers, &signed, &[])
            .unwrap());
    }

    #[test]
    fn verify_rejects_wrong_or_invalid_signers() {
        let chain = Chain::new("eth");
        let sym = Symbol::new("eth");
        let c = MockConnector::new();
        let tx = sample_utxo_tx();

        let signed = MockConnector::sign(&tx, vec![ExtAddress::new("1From")], false);
        assert!(!c
            .verify_signature(&chain, &sym, &[ExtAddress::new("1From")], &signed, &[])
            .unwrap());

        let signed = MockConnector::sign(&tx, vec![ExtAddress::new("1From")], true);
        assert!(!c
            .verify_signature(&chain, &sym, &[ExtAddress::new("1Other")], &signed, &[])
            .unwrap());
    }
}
