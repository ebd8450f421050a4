//! The ordered key-value abstraction every typed store is built on.
//!
//! The protocol persists all module state by composite byte keys in an
//! ordered KV store scanned by prefix. Backends implement this one trait:
//! the in-memory store below drives the deterministic execution path and
//! tests; the LMDB backend (separate crate) makes node state durable.

use crate::StoreError;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Minimal ordered KV interface: point reads/writes plus prefix scans.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// Compute the exclusive upper bound for a prefix range scan: the prefix
/// with its last non-0xff byte incremented. Returns `None` when the prefix
/// is all 0xff (scan to the end instead).
pub fn increment_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

/// In-memory ordered KV store.
///
/// Thread-safe so test harnesses can share it; the protocol itself applies
/// messages single-threaded.
pub struct MemKvStore {
    entries: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for MemKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let entries = self.entries.lock().unwrap();
        let iter: Vec<(Vec<u8>, Vec<u8>)> = match increment_prefix(prefix) {
            Some(upper) => entries
                .range(prefix.to_vec()..upper)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => entries
                .range(prefix.to_vec()..)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(iter)
    }
}
