//! # Error taxonomy
//!
//! One `thiserror` enum per layer, matching the granularity the wire codec,
//! store, command layer, and persistence module each need. Cross-layer
//! conversions (`From<StoreError> for CommandError`, etc.) let each layer's
//! `?` operator reach the next without a shared union type; `main` composes
//! the narrow types behind `anyhow::Result` at the top level instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the incremental RESP decoder.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("first byte not recognized: {0:#x}")]
    FirstByteNotRecognized(u8),
    #[error("value error: {0}")]
    ValueError(String),
    #[error("bulk string wrong size")]
    BulkStringWrongSize,
}

/// Errors from the glob-style pattern matcher.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PatternError {
    #[error("unterminated character class")]
    UnterminatedClass,
}

/// Errors from the keyspace store.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum StoreError {
    #[error("no such key")]
    KeyError,
}

/// Command-layer error taxonomy (one per invocation, earliest applicable).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CommandError {
    #[error("Wrong command: {0}")]
    WrongCommand(String),
    #[error("Wrong arguments: {0}")]
    WrongArgumentNumber(String),
    #[error("Syntax error: {0}")]
    SyntaxError(String),
    #[error("Wrong type: {0}")]
    WrongType(String),
    #[error("Key error: {0}")]
    KeyError(String),
    #[error("Out of range: {0}")]
    OutOfRange(String),
}

impl From<StoreError> for CommandError {
    fn from(_: StoreError) -> Self {
        CommandError::KeyError("no such key".to_string())
    }
}

impl From<PatternError> for CommandError {
    fn from(err: PatternError) -> Self {
        CommandError::SyntaxError(err.to_string())
    }
}

/// Errors from snapshot persistence (save/load).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("can't read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("can't load moes, {0} does not exist")]
    MissingDeadlines(PathBuf),
}
