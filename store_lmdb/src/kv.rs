//! LMDB implementation of `KvStore`.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use harbor_store::{increment_prefix, KvStore, StoreError};

use crate::LmdbError;

pub struct LmdbKvStore {
    env: Arc<Env>,
    db: Database<Bytes, Bytes>,
}

impl LmdbKvStore {
    /// Open or create an LMDB environment at `path`.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;
        // Safety contract of EnvOpenOptions::open: no other process may
        // have the environment open with different options. The node owns
        // its data directory exclusively.
        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(1).open(path)? };
        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, Some("custody"))?;
        wtxn.commit()?;
        tracing::debug!(path = %path.display(), "opened custody LMDB environment");
        Ok(Self {
            env: Arc::new(env),
            db,
        })
    }
}

impl KvStore for LmdbKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let value = self
            .db
            .get(&rtxn, key)
            .map_err(LmdbError::from)?
            .map(|v| v.to_vec());
        Ok(value)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.db.put(&mut wtxn, key, value).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.db.delete(&mut wtxn, key).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let upper = increment_prefix(prefix);
        let bounds = match &upper {
            Some(upper) => (Bound::Included(prefix), Bound::Excluded(upper.as_slice())),
            None => (Bound::Included(prefix), Bound::Unbounded),
        };
        let iter = self.db.range(&rtxn, &bounds).map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in iter {
            let (key, value) = entry.map_err(LmdbError::from)?;
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MAP_SIZE: usize = 16 * 1024 * 1024;

    fn open_temp() -> (tempfile::TempDir, LmdbKvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbKvStore::open(dir.path(), TEST_MAP_SIZE).unwrap();
        (dir, store)
    }

    #[test]
    fn roundtrip_and_delete() {
        let (_dir, store) = open_temp();
        store.set(b"k1", b"v1").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        store.delete(b"k1").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), None);
    }

    #[test]
    fn scan_prefix_ordered() {
        let (_dir, store) = open_temp();
        store.set(b"p\x02", b"b").unwrap();
        store.set(b"p\x01", b"a").unwrap();
        store.set(b"q\x01", b"c").unwrap();
        let hits = store.scan_prefix(b"p").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1, b"a");
        assert_eq!(hits[1].1, b"b");
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LmdbKvStore::open(dir.path(), TEST_MAP_SIZE).unwrap();
            store.set(b"persist", b"yes").unwrap();
        }
        let store = LmdbKvStore::open(dir.path(), TEST_MAP_SIZE).unwrap();
        assert_eq!(store.get(b"persist").unwrap(), Some(b"yes".to_vec()));
    }

    #[test]
    fn typed_stores_work_over_lmdb() {
        use harbor_orders::{DepositItem, DepositItemStatus};
        use harbor_store::DepositStore;
        use harbor_types::{Amount, CuAddress, ExtAddress, ExtTxHash, Symbol};

        let (_dir, store) = open_temp();
        let deposits = DepositStore::new(&store);
        let sym = Symbol::new("btc");
        let owner = CuAddress::new("hrb1user");
        deposits
            .new_item(
                &sym,
                &owner,
                &DepositItem {
                    hash: ExtTxHash::new("aa"),
                    index: 0,
                    amount: Amount::new(100),
                    ext_address: ExtAddress::new("1Abc"),
                    status: DepositItemStatus::WaitCollect,
                },
            )
            .unwrap();
        assert_eq!(deposits.items_for_owner(&sym, &owner).unwrap().len(), 1);
    }
}
