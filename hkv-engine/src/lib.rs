//! # hkv-engine
//!
//! The keyspace store, its snapshot persistence, and the background
//! expiration collector that periodically reclaims expired keys.

pub mod collector;
pub mod persistence;
pub mod store;

pub use store::Store;
