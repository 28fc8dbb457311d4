//! # hkv-common
//!
//! Shared types for the key-value server: the stored `Value`, the RESP wire
//! types (`Frame`/`Reply`) and incremental decoder, the glob-style pattern
//! matcher, the clock abstraction, and the error taxonomy shared by the
//! store, command, and persistence layers.

pub mod clock;
pub mod error;
pub mod pattern;
pub mod resp;
pub mod rng;
pub mod value;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{CommandError, DecodeError, PatternError, StorageError, StoreError};
pub use pattern::glob_match;
pub use resp::{Frame, Reply};
pub use value::Value;
