//! Custodial-unit registry.
//!
//! Every account the protocol touches is a custodial unit: either a user
//! account with per-chain deposit addresses, or a protocol-controlled
//! custodian (OPCU) that actually holds funds externally. The registry is
//! what deposit validation checks address ownership against, and where
//! the per-asset migration flags live.

use crate::keys::{composite, prefix};
use crate::kv::KvStore;
use crate::StoreError;
use harbor_types::{Chain, CuAddress, ExtAddress, Symbol};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CuKind {
    User,
    Custodian,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CuInfo {
    pub address: CuAddress,
    pub kind: CuKind,
    /// Canonical external address per chain.
    pub ext_addresses: Vec<(Chain, ExtAddress)>,
    /// Per-asset migration flags, maintained by OpcuAssetTransfer.
    /// Only meaningful for custodians.
    pub asset_migrated: Vec<(Symbol, bool)>,
}

impl CuInfo {
    pub fn new(address: CuAddress, kind: CuKind) -> Self {
        Self {
            address,
            kind,
            ext_addresses: Vec::new(),
            asset_migrated: Vec::new(),
        }
    }

    pub fn is_custodian(&self) -> bool {
        self.kind == CuKind::Custodian
    }

    pub fn ext_address(&self, chain: &Chain) -> Option<&ExtAddress> {
        self.ext_addresses
            .iter()
            .find(|(c, _)| c == chain)
            .map(|(_, a)| a)
    }

    pub fn set_ext_address(&mut self, chain: Chain, addr: ExtAddress) {
        match self.ext_addresses.iter_mut().find(|(c, _)| c == &chain) {
            Some((_, a)) => *a = addr,
            None => self.ext_addresses.push((chain, addr)),
        }
    }

    pub fn asset_migration_finished(&self, symbol: &Symbol) -> bool {
        self.asset_migrated
            .iter()
            .any(|(s, done)| s == symbol && *done)
    }

    pub fn set_asset_migrated(&mut self, symbol: Symbol, done: bool) {
        match self.asset_migrated.iter_mut().find(|(s, _)| s == &symbol) {
            Some((_, d)) => *d = done,
            None => self.asset_migrated.push((symbol, done)),
        }
    }
}

pub struct CuStore<'a, S: KvStore> {
    kv: &'a S,
}

fn cu_key(address: &CuAddress) -> Vec<u8> {
    composite(prefix::CU, &[address.as_str().as_bytes()])
}

impl<'a, S: KvStore> CuStore<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self { kv }
    }

    pub fn get_cu(&self, address: &CuAddress) -> Result<Option<CuInfo>, StoreError> {
        match self.kv.get(&cu_key(address))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_cu(&self, info: &CuInfo) -> Result<(), StoreError> {
        self.kv.set(&cu_key(&info.address), &bincode::serialize(info)?)
    }

    /// Every registered custodian, in address order.
    pub fn custodians(&self) -> Result<Vec<CuInfo>, StoreError> {
        let mut out = Vec::new();
        for (_, value) in self.kv.scan_prefix(&[prefix::CU])? {
            let info: CuInfo = bincode::deserialize(&value)?;
            if info.is_custodian() {
                out.push(info);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKvStore;

    #[test]
    fn ext_address_per_chain() {
        let mut cu = CuInfo::new(CuAddress::new("hrb1opcu"), CuKind::Custodian);
        cu.set_ext_address(Chain::new("btc"), ExtAddress::new("1Abc"));
        cu.set_ext_address(Chain::new("eth"), ExtAddress::new("0xdef"));
        assert_eq!(
            cu.ext_address(&Chain::new("btc")),
            Some(&ExtAddress::new("1Abc"))
        );
        assert_eq!(cu.ext_address(&Chain::new("ltc")), None);

        cu.set_ext_address(Chain::new("btc"), ExtAddress::new("1New"));
        assert_eq!(
            cu.ext_address(&Chain::new("btc")),
            Some(&ExtAddress::new("1New"))
        );
    }

    #[test]
    fn custodians_filters_users() {
        let kv = MemKvStore::new();
        let store = CuStore::new(&kv);
        store
            .set_cu(&CuInfo::new(CuAddress::new("hrb1user"), CuKind::User))
            .unwrap();
        store
            .set_cu(&CuInfo::new(CuAddress::new("hrb1opcu"), CuKind::Custodian))
            .unwrap();
        let custodians = store.custodians().unwrap();
        assert_eq!(custodians.len(), 1);
        assert_eq!(custodians[0].address, CuAddress::new("hrb1opcu"));
    }

    #[test]
    fn migration_flags() {
        let mut cu = CuInfo::new(CuAddress::new("hrb1opcu"), CuKind::Custodian);
        let btc = Symbol::new("btc");
        assert!(!cu.asset_migration_finished(&btc));
        cu.set_asset_migrated(btc.clone(), true);
        assert!(cu.asset_migration_finished(&btc));
    }
}
