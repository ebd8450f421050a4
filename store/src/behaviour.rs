//! Per-validator behaviour counters.
//!
//! Keyed `(behaviour_key, validator)` in the store rather than held as
//! in-memory globals, so the counters survive restarts and stay part of
//! the deterministic state. The external slashing module owns what the
//! counts mean; this module only records them, and resets on its signal.

use crate::keys::{composite, prefix};
use crate::kv::KvStore;
use crate::StoreError;
use harbor_types::ValidatorAddress;

pub struct BehaviourStore<'a, S: KvStore> {
    kv: &'a S,
}

fn behaviour_key(key: &str, validator: &ValidatorAddress) -> Vec<u8> {
    composite(
        prefix::BEHAVIOUR,
        &[key.as_bytes(), validator.as_str().as_bytes()],
    )
}

impl<'a, S: KvStore> BehaviourStore<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self { kv }
    }

    pub fn get(&self, key: &str, validator: &ValidatorAddress) -> Result<u64, StoreError> {
        match self.kv.get(&behaviour_key(key, validator))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(0),
        }
    }

    /// Bump the misbehaviour counter; returns the new value.
    pub fn record(&self, key: &str, validator: &ValidatorAddress) -> Result<u64, StoreError> {
        let next = self.get(key, validator)? + 1;
        self.kv
            .set(&behaviour_key(key, validator), &bincode::serialize(&next)?)?;
        Ok(next)
    }

    /// Reset after the external module has consumed (slashed on) the count.
    pub fn reset(&self, key: &str, validator: &ValidatorAddress) -> Result<(), StoreError> {
        self.kv.delete(&behaviour_key(key, validator))
    }
}
