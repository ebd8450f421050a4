//! Token metadata storage.

use crate::keys::{composite, prefix};
use crate::kv::KvStore;
use crate::StoreError;
use harbor_types::{Symbol, TokenInfo};

pub struct TokenStore<'a, S: KvStore> {
    kv: &'a S,
}

fn token_key(symbol: &Symbol) -> Vec<u8> {
    composite(prefix::TOKEN, &[symbol.as_str().as_bytes()])
}

impl<'a, S: KvStore> TokenStore<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self { kv }
    }

    pub fn get_token(&self, symbol: &Symbol) -> Result<Option<TokenInfo>, StoreError> {
        match self.kv.get(&token_key(symbol))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_token(&self, token: &TokenInfo) -> Result<(), StoreError> {
        self.kv
            .set(&token_key(&token.symbol), &bincode::serialize(token)?)
    }
}
