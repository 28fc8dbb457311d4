//! # hkv-server
//!
//! The connection loop, command dispatcher, and request metrics for the
//! key-value server binary. Split into a library so integration tests can
//! drive a real listener the same way the binary does.

pub mod connection;
pub mod dispatch;
pub mod metrics;
