//! # Stored value
//!
//! The keyspace holds exactly three shapes of value. Tagged as an explicit
//! enum rather than checked at each call site with `match`-free dynamic
//! typing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Hash(HashMap<String, String>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<String>> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashMap<String, String>> {
        match self {
            Value::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn as_hash_mut(&mut self) -> Option<&mut HashMap<String, String>> {
        match self {
            Value::Hash(hash) => Some(hash),
            _ => None,
        }
    }
}
