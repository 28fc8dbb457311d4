//! # Command dispatch
//!
//! Translates a decoded argument vector into a store operation and a
//! `Reply`. Arity and type checking happen here, one command at a time;
//! the connection loop only ever sees a `Reply` or is handed nothing to
//! retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hkv_common::clock::Clock;
use hkv_common::error::CommandError;
use hkv_common::resp::Reply;
use hkv_common::value::Value;
use hkv_engine::Store;
use tracing::warn;

/// Past this many arguments a single command is almost certainly a client
/// bug rather than a large but legitimate batch; logged once per process.
const LARGE_ARGS_THRESHOLD: usize = 100;

enum ExpiryOpt {
    Ex(f64),
    Px(f64),
    ExAt(f64),
    PxAt(f64),
    KeepTtl,
}

enum Existence {
    Nx,
    Xx,
}

pub struct Dispatcher {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    warned_large_args: AtomicBool,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Dispatcher {
            store,
            clock,
            warned_large_args: AtomicBool::new(false),
        }
    }

    /// Runs one command and always returns a reply: `CommandError`s are
    /// turned into `Reply::Error` here so the connection loop never has to
    /// branch on success vs. failure.
    pub fn execute(&self, args: Vec<String>) -> Reply {
        if args.len() > LARGE_ARGS_THRESHOLD
            && self
                .warned_large_args
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            warn!(arg_count = args.len(), "command with unusually many arguments");
        }
        match self.dispatch(args) {
            Ok(reply) => reply,
            Err(err) => Reply::Error(err.to_string()),
        }
    }

    fn dispatch(&self, mut args: Vec<String>) -> Result<Reply, CommandError> {
        if args.is_empty() {
            return Err(CommandError::WrongCommand("empty command".to_string()));
        }
        let name = args.remove(0);
        match name.to_ascii_uppercase().as_str() {
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DEL" => self.cmd_del(args),
            "KEYS" => self.cmd_keys(args),
            "LRANGE" => self.cmd_lrange(args),
            "LPUSH" => self.cmd_push(args, true),
            "RPUSH" => self.cmd_push(args, false),
            "LSET" => self.cmd_lset(args),
            "LGET" => self.cmd_lget(args),
            "HSET" => self.cmd_hset(args),
            "HGET" => self.cmd_hget(args),
            "EXPIRE" => self.cmd_expire(args),
            "PERSIST" => self.cmd_persist(args),
            other => Err(CommandError::WrongCommand(other.to_string())),
        }
    }

    fn cmd_get(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongArgumentNumber("GET".to_string()));
        }
        match self.store.get(&args[0]) {
            Ok(Value::Str(s)) => Ok(Reply::Bulk(s)),
            Ok(_) => Err(CommandError::WrongType(
                "GET against a non-string value".to_string(),
            )),
            Err(_) => Ok(Reply::NilBulk),
        }
    }

    fn cmd_set(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() < 2 {
            return Err(CommandError::WrongArgumentNumber("SET".to_string()));
        }
        let key = args[0].clone();
        let new_value = args[1].clone();

        let mut expiry: Option<ExpiryOpt> = None;
        let mut existence: Option<Existence> = None;
        let mut want_get = false;

        let mut i = 2;
        while i < args.len() {
            let token = args[i].to_ascii_uppercase();
            match token.as_str() {
                "EX" | "PX" | "EXAT" | "PXAT" => {
                    if expiry.is_some() {
                        return Err(CommandError::SyntaxError(
                            "conflicting expire options".to_string(),
                        ));
                    }
                    let raw = args.get(i + 1).ok_or_else(|| {
                        CommandError::SyntaxError(format!("{token} needs a value"))
                    })?;
                    let num = parse_i64(raw)? as f64;
                    expiry = Some(match token.as_str() {
                        "EX" => ExpiryOpt::Ex(num),
                        "PX" => ExpiryOpt::Px(num),
                        "EXAT" => ExpiryOpt::ExAt(num),
                        _ => ExpiryOpt::PxAt(num),
                    });
                    i += 2;
                }
                "KEEPTTL" => {
                    if expiry.is_some() {
                        return Err(CommandError::SyntaxError(
                            "KEEPTTL conflicts with an expire option".to_string(),
                        ));
                    }
                    expiry = Some(ExpiryOpt::KeepTtl);
                    i += 1;
                }
                "NX" | "XX" => {
                    if existence.is_some() {
                        return Err(CommandError::SyntaxError(
                            "NX and XX are mutually exclusive".to_string(),
                        ));
                    }
                    existence = Some(if token == "NX" { Existence::Nx } else { Existence::Xx });
                    i += 1;
                }
                "GET" => {
                    want_get = true;
                    i += 1;
                }
                other => {
                    return Err(CommandError::SyntaxError(format!(
                        "unknown SET option: {other}"
                    )))
                }
            }
        }

        let now = self.clock.now();
        let (deadline, keep_deadline) = match expiry {
            None => (None, false),
            Some(ExpiryOpt::KeepTtl) => (None, true),
            Some(ExpiryOpt::Ex(secs)) => (Some(now + secs), false),
            Some(ExpiryOpt::Px(millis)) => (Some(now + millis / 1000.0), false),
            Some(ExpiryOpt::ExAt(at)) => (Some(at), false),
            Some(ExpiryOpt::PxAt(at_millis)) => (Some(at_millis / 1000.0), false),
        };

        // NX/XX's existence check and the write itself happen under one
        // lock acquisition in `set_conditional`, so a concurrent SET on the
        // same key can't slip in between the check and the write.
        let (suppressed, previous) = self.store.set_conditional(
            &key,
            Value::Str(new_value),
            deadline,
            keep_deadline,
            want_get,
            |existing| match existence {
                Some(Existence::Nx) => existing.is_none(),
                Some(Existence::Xx) => existing.is_some(),
                None => true,
            },
        );

        if want_get {
            if let Some(v) = &previous {
                if !matches!(v, Value::Str(_)) {
                    return Err(CommandError::WrongType(
                        "SET GET against a non-string value".to_string(),
                    ));
                }
            }
        }

        if suppressed {
            return Ok(match (want_get, previous) {
                (true, Some(Value::Str(s))) => Reply::Bulk(s),
                _ => Reply::NilBulk,
            });
        }

        if want_get {
            Ok(match previous {
                Some(Value::Str(s)) => Reply::Bulk(s),
                _ => Reply::NilBulk,
            })
        } else {
            Ok(Reply::Ok)
        }
    }

    fn cmd_del(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.is_empty() {
            return Err(CommandError::WrongArgumentNumber("DEL".to_string()));
        }
        Ok(Reply::Int(self.store.delete(&args) as i64))
    }

    fn cmd_keys(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongArgumentNumber("KEYS".to_string()));
        }
        let keys = self.store.keys(&args[0])?;
        Ok(Reply::strings(keys))
    }

    fn cmd_lrange(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 3 {
            return Err(CommandError::WrongArgumentNumber("LRANGE".to_string()));
        }
        let start = parse_i64(&args[1])?;
        let stop = parse_i64(&args[2])?;
        self.store.with_value(&args[0], |value| match value {
            None => Ok(Reply::NilArray),
            Some(Value::List(list)) => {
                let len = list.len();
                let start_idx = normalize_index(start, len);
                let stop_idx = normalize_index(stop, len);
                if start_idx >= len || start_idx > stop_idx {
                    return Ok(Reply::strings(Vec::new()));
                }
                let end = (stop_idx + 1).min(len);
                Ok(Reply::strings(list[start_idx..end].to_vec()))
            }
            Some(_) => Err(CommandError::WrongType(
                "LRANGE against a non-list value".to_string(),
            )),
        })
    }

    /// Shared body for LPUSH/RPUSH: `prepend` distinguishes the two.
    fn cmd_push(&self, args: Vec<String>, prepend: bool) -> Result<Reply, CommandError> {
        if args.len() < 2 {
            let name = if prepend { "LPUSH" } else { "RPUSH" };
            return Err(CommandError::WrongArgumentNumber(name.to_string()));
        }
        let key = args[0].clone();
        let values = &args[1..];
        self.store.with_entry_mut(
            &key,
            || Value::List(Vec::new()),
            |entry| match entry {
                Value::List(list) => {
                    if prepend {
                        for v in values {
                            list.insert(0, v.clone());
                        }
                    } else {
                        list.extend(values.iter().cloned());
                    }
                    Ok(Reply::Int(list.len() as i64))
                }
                _ => Err(CommandError::WrongType(format!(
                    "{} against a non-list value",
                    if prepend { "LPUSH" } else { "RPUSH" }
                ))),
            },
        )
    }

    fn cmd_lset(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 3 {
            return Err(CommandError::WrongArgumentNumber("LSET".to_string()));
        }
        let idx = parse_i64(&args[1])?;
        let new_val = args[2].clone();
        self.store.with_value_mut(&args[0], |value| match value {
            None => Err(CommandError::KeyError(format!("no such key {}", args[0]))),
            Some(Value::List(list)) => {
                if idx < 0 || idx as usize >= list.len() {
                    return Err(CommandError::OutOfRange("list index out of range".to_string()));
                }
                list[idx as usize] = new_val;
                Ok(Reply::Ok)
            }
            Some(_) => Err(CommandError::WrongType(
                "LSET against a non-list value".to_string(),
            )),
        })
    }

    fn cmd_lget(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongArgumentNumber("LGET".to_string()));
        }
        let idx = parse_i64(&args[1])?;
        self.store.with_value(&args[0], |value| match value {
            None => Err(CommandError::KeyError(format!("no such key {}", args[0]))),
            Some(Value::List(list)) => {
                if idx < 0 || idx as usize >= list.len() {
                    return Err(CommandError::OutOfRange("list index out of range".to_string()));
                }
                Ok(Reply::Bulk(list[idx as usize].clone()))
            }
            Some(_) => Err(CommandError::WrongType(
                "LGET against a non-list value".to_string(),
            )),
        })
    }

    fn cmd_hset(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() < 3 || args.len() % 2 == 0 {
            return Err(CommandError::WrongArgumentNumber("HSET".to_string()));
        }
        let key = args[0].clone();
        let pairs = &args[1..];
        self.store.with_entry_mut(
            &key,
            || Value::Hash(std::collections::HashMap::new()),
            |entry| match entry {
                Value::Hash(hash) => {
                    let mut added = 0i64;
                    for pair in pairs.chunks(2) {
                        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                            added += 1;
                        }
                    }
                    Ok(Reply::Int(added))
                }
                _ => Err(CommandError::WrongType(
                    "HSET against a non-hash value".to_string(),
                )),
            },
        )
    }

    fn cmd_hget(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongArgumentNumber("HGET".to_string()));
        }
        self.store.with_value(&args[0], |value| match value {
            None => Ok(Reply::NilBulk),
            Some(Value::Hash(hash)) => Ok(match hash.get(&args[1]) {
                Some(v) => Reply::Bulk(v.clone()),
                None => Reply::NilBulk,
            }),
            Some(_) => Err(CommandError::WrongType(
                "HGET against a non-hash value".to_string(),
            )),
        })
    }

    fn cmd_expire(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongArgumentNumber("EXPIRE".to_string()));
        }
        let seconds = parse_i64(&args[1])? as f64;
        let deadline = self.clock.now() + seconds;
        match self.store.set_deadline(&args[0], Some(deadline)) {
            Ok(()) => Ok(Reply::Int(1)),
            Err(_) => Ok(Reply::Int(0)),
        }
    }

    fn cmd_persist(&self, args: Vec<String>) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongArgumentNumber("PERSIST".to_string()));
        }
        Ok(Reply::Int(self.store.clear_deadline_if_present(&args[0]) as i64))
    }
}

/// `i < 0` means "from the end" (`len + i`), clamped into `[0, len]` either
/// way. Applied uniformly to both LRANGE bounds, which also covers the
/// conventional "`-1` means the last element" case without a special case.
fn normalize_index(i: i64, len: usize) -> usize {
    let len = len as i64;
    let resolved = if i < 0 { len + i } else { i };
    resolved.clamp(0, len) as usize
}

fn parse_i64(s: &str) -> Result<i64, CommandError> {
    s.parse()
        .map_err(|_| CommandError::SyntaxError(format!("not an integer: {s}")))
}
