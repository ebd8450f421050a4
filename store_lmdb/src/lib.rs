//! LMDB storage backend for the harbor custody protocol.
//!
//! One LMDB environment, one database: the module's whole state already
//! lives under composite prefixed keys, so the ordered key space maps
//! straight onto a single `Database<Bytes, Bytes>`.

pub mod error;
pub mod kv;

pub use error::LmdbError;
pub use kv::LmdbKvStore;
