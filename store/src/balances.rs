//! Balance, gas, send-gate, and nonce storage.
//!
//! Raw storage only — the arithmetic and its invariants (no negative
//! balances, flow records, the send-gate discipline) live in the ledger
//! crate.

use crate::keys::{composite, prefix};
use crate::kv::KvStore;
use crate::StoreError;
use harbor_types::{Amount, Chain, CuAddress, ExtAddress, Symbol};
use serde::{Deserialize, Serialize};

/// Available / on-hold position of one `(account, asset)` pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub available: Amount,
    pub hold: Amount,
}

impl AssetBalance {
    /// Everything the account has in this asset, spendable or reserved.
    pub fn total(&self) -> Option<Amount> {
        self.available.checked_add(self.hold)
    }
}

/// Gas fronted to and consumed by one external address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasInfo {
    pub received: Amount,
    pub used: Amount,
}

impl GasInfo {
    /// Gas still available at the address.
    pub fn remained(&self) -> Amount {
        self.received.saturating_sub(self.used)
    }
}

pub struct BalanceStore<'a, S: KvStore> {
    kv: &'a S,
}

fn balance_key(cu: &CuAddress, symbol: &Symbol) -> Vec<u8> {
    composite(
        prefix::BALANCE,
        &[cu.as_str().as_bytes(), symbol.as_str().as_bytes()],
    )
}

fn gas_key(chain: &Chain, addr: &ExtAddress) -> Vec<u8> {
    composite(
        prefix::GAS,
        &[chain.as_str().as_bytes(), addr.as_str().as_bytes()],
    )
}

fn send_enabled_key(chain: &Chain, addr: &ExtAddress) -> Vec<u8> {
    composite(
        prefix::SEND_ENABLED,
        &[chain.as_str().as_bytes(), addr.as_str().as_bytes()],
    )
}

fn nonce_key(chain: &Chain, addr: &ExtAddress) -> Vec<u8> {
    composite(
        prefix::NONCE,
        &[chain.as_str().as_bytes(), addr.as_str().as_bytes()],
    )
}

impl<'a, S: KvStore> BalanceStore<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self { kv }
    }

    /// Missing entries read as zero — accounts come into being by
    /// receiving funds.
    pub fn get_balance(&self, cu: &CuAddress, symbol: &Symbol) -> Result<AssetBalance, StoreError> {
        match self.kv.get(&balance_key(cu, symbol))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(AssetBalance::default()),
        }
    }

    pub fn set_balance(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        balance: &AssetBalance,
    ) -> Result<(), StoreError> {
        self.kv
            .set(&balance_key(cu, symbol), &bincode::serialize(balance)?)
    }

    pub fn get_gas(&self, chain: &Chain, addr: &ExtAddress) -> Result<GasInfo, StoreError> {
        match self.kv.get(&gas_key(chain, addr))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(GasInfo::default()),
        }
    }

    pub fn set_gas(
        &self,
        chain: &Chain,
        addr: &ExtAddress,
        gas: &GasInfo,
    ) -> Result<(), StoreError> {
        self.kv.set(&gas_key(chain, addr), &bincode::serialize(gas)?)
    }

    /// The single-writer gate on an external address. Unset reads as
    /// enabled: a fresh address has no transaction in flight.
    pub fn send_enabled(&self, chain: &Chain, addr: &ExtAddress) -> Result<bool, StoreError> {
        match self.kv.get(&send_enabled_key(chain, addr))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(true),
        }
    }

    pub fn set_send_enabled(
        &self,
        chain: &Chain,
        addr: &ExtAddress,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.kv
            .set(&send_enabled_key(chain, addr), &bincode::serialize(&enabled)?)
    }

    pub fn nonce(&self, chain: &Chain, addr: &ExtAddress) -> Result<u64, StoreError> {
        match self.kv.get(&nonce_key(chain, addr))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(0),
        }
    }

    pub fn set_nonce(
        &self,
        chain: &Chain,
        addr: &ExtAddress,
        nonce: u64,
    ) -> Result<(), StoreError> {
        self.kv
            .set(&nonce_key(chain, addr), &bincode::serialize(&nonce)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKvStore;

    #[test]
    fn missing_balance_reads_zero() {
        let kv = MemKvStore::new();
        let store = BalanceStore::new(&kv);
        let bal = store
            .get_balance(&CuAddress::new("hrb1a"), &Symbol::new("btc"))
            .unwrap();
        assert_eq!(bal, AssetBalance::default());
    }

    #[test]
    fn balance_roundtrips() {
        let kv = MemKvStore::new();
        let store = BalanceStore::new(&kv);
        let cu = CuAddress::new("hrb1a");
        let sym = Symbol::new("btc");
        let bal = AssetBalance {
            available: Amount::new(100),
            hold: Amount::new(40),
        };
        store.set_balance(&cu, &sym, &bal).unwrap();
        assert_eq!(store.get_balance(&cu, &sym).unwrap(), bal);
        assert_eq!(bal.total(), Some(Amount::new(140)));
    }

    #[test]
    fn fresh_address_is_send_enabled() {
        let kv = MemKvStore::new();
        let store = BalanceStore::new(&kv);
        let chain = Chain::new("eth");
        let addr = ExtAddress::new("0xabc");
        assert!(store.send_enabled(&chain, &addr).unwrap());
        store.set_send_enabled(&chain, &addr, false).unwrap();
        assert!(!store.send_enabled(&chain, &addr).unwrap());
    }

    #[test]
    fn gas_remained_saturates() {
        let gas = GasInfo {
            received: Amount::new(10),
            used: Amount::new(25),
        };
        assert_eq!(gas.remained(), Amount::ZERO);
    }

    #[test]
    fn nonce_defaults_to_zero() {
        let kv = MemKvStore::new();
        let store = BalanceStore::new(&kv);
        let chain = Chain::new("eth");
        let addr = ExtAddress::new("0xabc");
        assert_eq!(store.nonce(&chain, &addr).unwrap(), 0);
        store.set_nonce(&chain, &addr, 7).unwrap();
        assert_eq!(store.nonce(&chain, &addr).unwrap(), 7);
    }
}
