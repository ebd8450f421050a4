//! Deposit item storage.
//!
//! Keyed `(symbol, owner, hash, index)`; a given key is created at most
//! once, which is what makes replayed deposit messages harmless.

use crate::keys::{composite, prefix};
use crate::kv::KvStore;
use crate::StoreError;
use harbor_orders::DepositItem;
use harbor_types::{CuAddress, Symbol, UtxoRef};

pub struct DepositStore<'a, S: KvStore> {
    kv: &'a S,
}

fn item_key(symbol: &Symbol, owner: &CuAddress, utxo: &UtxoRef) -> Vec<u8> {
    composite(
        prefix::DEPOSIT_ITEM,
        &[
            symbol.as_str().as_bytes(),
            owner.as_str().as_bytes(),
            utxo.hash.as_str().as_bytes(),
            &utxo.index.to_be_bytes(),
        ],
    )
}

impl<'a, S: KvStore> DepositStore<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self { kv }
    }

    /// Record a fresh external credit. Fails with `Duplicate` if the
    /// `(symbol, owner, hash, index)` tuple already exists.
    pub fn new_item(
        &self,
        symbol: &Symbol,
        owner: &CuAddress,
        item: &DepositItem,
    ) -> Result<(), StoreError> {
        let key = item_key(symbol, owner, &item.utxo_ref());
        if self.kv.get(&key)?.is_some() {
            return Err(StoreError::Duplicate(format!(
                "{symbol}/{owner}/{}",
                item.utxo_ref()
            )));
        }
        self.kv.set(&key, &bincode::serialize(item)?)
    }

    pub fn get_item(
        &self,
        symbol: &Symbol,
        owner: &CuAddress,
        utxo: &UtxoRef,
    ) -> Result<Option<DepositItem>, StoreError> {
        match self.kv.get(&item_key(symbol, owner, utxo))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an existing item (status moves).
    pub fn set_item(
        &self,
        symbol: &Symbol,
        owner: &CuAddress,
        item: &DepositItem,
    ) -> Result<(), StoreError> {
        let key = item_key(symbol, owner, &item.utxo_ref());
        self.kv.set(&key, &bincode::serialize(item)?)
    }

    /// Every recorded credit of `owner` in `symbol`, in key order.
    pub fn items_for_owner(
        &self,
        symbol: &Symbol,
        owner: &CuAddress,
    ) -> Result<Vec<DepositItem>, StoreError> {
        let scan = composite(
            prefix::DEPOSIT_ITEM,
            &[symbol.as_str().as_bytes(), owner.as_str().as_bytes()],
        );
        let mut items = Vec::new();
        for (_, value) in self.kv.scan_prefix(&scan)? {
            items.push(bincode::deserialize(&value)?);
        }
        Ok(items)
    }

    /// Remove an item — only used when reassigning custodian UTXOs during
    /// an asset migration.
    pub fn delete_item(
        &self,
        symbol: &Symbol,
        owner: &CuAddress,
        utxo: &UtxoRef,
    ) -> Result<(), StoreError> {
        self.kv.delete(&item_key(symbol, owner, utxo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKvStore;
    use harbor_orders::DepositItemStatus;
    use harbor_types::{Amount, ExtAddress, ExtTxHash};

    fn item(hash: &str, index: u64, amount: u128) -> DepositItem {
        DepositItem {
            hash: ExtTxHash::new(hash),
            index,
            amount: Amount::new(amount),
            ext_address: ExtAddress::new("addr1"),
            status: DepositItemStatus::WaitCollect,
        }
    }

    #[test]
    fn item_created_at_most_once() {
        let kv = MemKvStore::new();
        let store = DepositStore::new(&kv);
        let sym = Symbol::new("btc");
        let owner = CuAddress::new("hrb1user");

        store.new_item(&sym, &owner, &item("aa", 0, 100)).unwrap();
        assert!(matches!(
            store.new_item(&sym, &owner, &item("aa", 0, 100)),
            Err(StoreError::Duplicate(_))
        ));
        // Same hash, different index is a different credit.
        store.new_item(&sym, &owner, &item("aa", 1, 100)).unwrap();
    }

    #[test]
    fn items_scoped_by_owner() {
        let kv = MemKvStore::new();
        let store = DepositStore::new(&kv);
        let sym = Symbol::new("btc");
        let a = CuAddress::new("hrb1a");
        let b = CuAddress::new("hrb1b");

        store.new_item(&sym, &a, &item("aa", 0, 100)).unwrap();
        store.new_item(&sym, &a, &item("bb", 0, 200)).unwrap();
        store.new_item(&sym, &b, &item("cc", 0, 300)).unwrap();

        assert_eq!(store.items_for_owner(&sym, &a).unwrap().len(), 2);
        assert_eq!(store.items_for_owner(&sym, &b).unwrap().len(), 1);
    }

    #[test]
    fn status_update_overwrites_in_place() {
        let kv = MemKvStore::new();
        let store = DepositStore::new(&kv);
        let sym = Symbol::new("btc");
        let owner = CuAddress::new("hrb1user");
        let mut it = item("aa", 0, 100);
        store.new_item(&sym, &owner, &it).unwrap();

        it.status = DepositItemStatus::InProcess;
        store.set_item(&sym, &owner, &it).unwrap();

        let got = store.get_item(&sym, &owner, &it.utxo_ref()).unwrap().unwrap();
        assert_eq!(got.status, DepositItemStatus::InProcess);
    }
}
