//! # Keyspace store
//!
//! Holds the `values` and `deadlines` mappings behind a single lock, per the
//! concurrency model: this server runs one task per connection on a
//! multi-threaded runtime, so every operation here takes the same
//! process-wide mutex rather than relying on single-threaded cooperative
//! scheduling.

use std::path::PathBuf;
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

use hkv_common::clock::Clock;
use hkv_common::error::{PatternError, StoreError};
use hkv_common::pattern::glob_match;
use hkv_common::rng::XorShift64;
use hkv_common::value::Value;

use crate::persistence;

struct Inner {
    values: HashMap<String, Value, RandomState>,
    deadlines: HashMap<String, f64, RandomState>,
}

/// Process-wide keyspace singleton, shared by connection handlers and the
/// expiration collector.
pub struct Store {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    file_prefix: Option<PathBuf>,
}

impl Store {
    pub fn new(clock: Arc<dyn Clock>, file_prefix: Option<PathBuf>) -> Self {
        Store {
            inner: Mutex::new(Inner {
                values: HashMap::default(),
                deadlines: HashMap::default(),
            }),
            clock,
            file_prefix,
        }
    }

    fn evict_if_expired(inner: &mut Inner, key: &str, now: f64) -> bool {
        if let Some(&deadline) = inner.deadlines.get(key) {
            if deadline <= now {
                inner.deadlines.remove(key);
                inner.values.remove(key);
                return true;
            }
        }
        false
    }

    pub fn get(&self, key: &str) -> Result<Value, StoreError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        Self::evict_if_expired(&mut inner, key, now);
        inner.values.get(key).cloned().ok_or(StoreError::KeyError)
    }

    /// See `§4.3 set` in the specification for the deadline-handling rules.
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &self,
        key: &str,
        value: Value,
        deadline: Option<f64>,
        keep_deadline: bool,
        return_previous: bool,
    ) -> Option<Value> {
        let mut inner = self.inner.lock();
        let prev = if return_previous {
            inner.values.get(key).cloned()
        } else {
            None
        };
        inner.values.insert(key.to_string(), value);
        if !keep_deadline {
            match deadline {
                Some(d) => {
                    inner.deadlines.insert(key.to_string(), d);
                }
                None => {
                    inner.deadlines.remove(key);
                }
            }
        }
        prev
    }

    pub fn delete(&self, keys: &[String]) -> usize {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let mut count = 0;
        for key in keys {
            if inner.values.remove(key).is_some() {
                match inner.deadlines.remove(key) {
                    Some(deadline) if deadline <= now => {}
                    _ => count += 1,
                }
            }
        }
        count
    }

    pub fn keys(&self, pattern: &str) -> Result<Vec<String>, PatternError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let mut matched = Vec::new();
        let mut expired = Vec::new();
        for key in inner.values.keys() {
            if glob_match(key, pattern)? {
                let is_expired = inner
                    .deadlines
                    .get(key)
                    .is_some_and(|&deadline| deadline <= now);
                if is_expired {
                    expired.push(key.clone());
                } else {
                    matched.push(key.clone());
                }
            }
        }
        for key in &expired {
            inner.values.remove(key);
            inner.deadlines.remove(key);
        }
        Ok(matched)
    }

    pub fn set_deadline(&self, key: &str, deadline: Option<f64>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.values.contains_key(key) {
            return Err(StoreError::KeyError);
        }
        match deadline {
            Some(d) => {
                inner.deadlines.insert(key.to_string(), d);
            }
            None => {
                inner.deadlines.remove(key);
            }
        }
        Ok(())
    }

    /// Clears `key`'s deadline if it has one, all under one lock
    /// acquisition. Returns `true` iff a deadline was actually cleared.
    /// Used by PERSIST, which must check-and-clear atomically with respect
    /// to a concurrent EXPIRE/DEL/SET on the same key.
    pub fn clear_deadline_if_present(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        Self::evict_if_expired(&mut inner, key, now);
        if !inner.values.contains_key(key) {
            return false;
        }
        inner.deadlines.remove(key).is_some()
    }

    /// Performs a conditional SET atomically: `should_write` inspects the
    /// value currently stored for `key` (before any write) and decides
    /// whether the write proceeds, all under one lock acquisition. Used by
    /// SET NX/XX, which must check existence and write in the same critical
    /// section rather than racing a concurrent SET on the same key.
    ///
    /// Returns `(suppressed, previous)`: `previous` is collected whenever
    /// `return_previous` is true, regardless of whether the write happened.
    #[allow(clippy::too_many_arguments)]
    pub fn set_conditional<F>(
        &self,
        key: &str,
        value: Value,
        deadline: Option<f64>,
        keep_deadline: bool,
        return_previous: bool,
        should_write: F,
    ) -> (bool, Option<Value>)
    where
        F: FnOnce(Option<&Value>) -> bool,
    {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        Self::evict_if_expired(&mut inner, key, now);

        let previous = if return_previous {
            inner.values.get(key).cloned()
        } else {
            None
        };

        if !should_write(inner.values.get(key)) {
            return (true, previous);
        }

        inner.values.insert(key.to_string(), value);
        if !keep_deadline {
            match deadline {
                Some(d) => {
                    inner.deadlines.insert(key.to_string(), d);
                }
                None => {
                    inner.deadlines.remove(key);
                }
            }
        }
        (false, previous)
    }

    /// Runs a closure against the value stored for `key`, lazily expiring it
    /// first. Used by the command layer to read-modify-write list/hash
    /// values under the store's single lock without a read then a
    /// separate write racing another connection.
    pub fn with_value_mut<F, R>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(Option<&mut Value>) -> R,
    {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        Self::evict_if_expired(&mut inner, key, now);
        f(inner.values.get_mut(key))
    }

    pub fn with_value<F, R>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(Option<&Value>) -> R,
    {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        Self::evict_if_expired(&mut inner, key, now);
        f(inner.values.get(key))
    }

    /// Runs `f` against the value stored for `key`, creating it with
    /// `default` first if absent, all under one lock acquisition. Used by
    /// LPUSH/RPUSH/HSET, which must create-or-append atomically with respect
    /// to other connections and the expiration collector.
    pub fn with_entry_mut<F, R>(&self, key: &str, default: impl FnOnce() -> Value, f: F) -> R
    where
        F: FnOnce(&mut Value) -> R,
    {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        Self::evict_if_expired(&mut inner, key, now);
        let entry = inner.values.entry(key.to_string()).or_insert_with(default);
        f(entry)
    }

    /// Samples up to `sample_size` keys with a deadline and evicts the ones
    /// past due. Returns `(sampled, evicted)`. Used by the expiration
    /// collector; see `collector::run`.
    pub fn sample_and_evict(&self, sample_size: usize, rng: &mut XorShift64) -> (usize, usize) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();

        let mut candidates: Vec<String> = inner.deadlines.keys().cloned().collect();
        if candidates.is_empty() {
            return (0, 0);
        }
        if candidates.len() > sample_size {
            rng.shuffle(&mut candidates);
            candidates.truncate(sample_size);
        }

        let sampled = candidates.len();
        let mut evicted = 0;
        for key in candidates {
            if let Some(&deadline) = inner.deadlines.get(&key) {
                if deadline <= now {
                    inner.deadlines.remove(&key);
                    inner.values.remove(&key);
                    evicted += 1;
                }
            }
        }
        (sampled, evicted)
    }

    pub fn save(&self) -> Result<(), hkv_common::error::StorageError> {
        let Some(prefix) = &self.file_prefix else {
            return Ok(());
        };
        let inner = self.inner.lock();
        persistence::save(prefix, &inner.values, &inner.deadlines)
    }

    pub fn load(&self) -> Result<(), hkv_common::error::StorageError> {
        let Some(prefix) = &self.file_prefix else {
            return Ok(());
        };
        let (values, deadlines) = persistence::load(prefix)?;
        let mut inner = self.inner.lock();
        inner.values = values;
        inner.deadlines = deadlines;
        Ok(())
    }
}
