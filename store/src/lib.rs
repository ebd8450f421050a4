//! Storage layer for the harbor custody protocol.
//!
//! All module state lives in one ordered key-value store under composite
//! byte keys (`prefix || len-tagged segments`), scanned by prefix for
//! per-owner and per-kind iteration. The `KvStore` trait is the only
//! backend seam: the in-memory store here backs deterministic execution
//! and tests, the LMDB crate backs durable node storage.

pub mod balances;
pub mod behaviour;
pub mod cus;
pub mod deposits;
pub mod error;
pub mod keys;
pub mod kv;
pub mod orders;
pub mod tokens;
pub mod votes;

pub use balances::{AssetBalance, BalanceStore, GasInfo};
pub use behaviour::BehaviourStore;
pub use cus::{CuInfo, CuKind, CuStore};
pub use deposits::DepositStore;
pub use error::StoreError;
pub use kv::{increment_prefix, KvStore, MemKvStore};
pub use orders::OrderStore;
pub use tokens::TokenStore;
pub use votes::VoteStore;
