//! # Snapshot persistence
//!
//! Writes `values` and `deadlines` to two sibling files, `<prefix>_keys` and
//! `<prefix>_moes` ("moment of expiration", matching the naming already used
//! in the distilled design). Each file holds one `bincode`-encoded map: a
//! stable, portable byte format standing in for the source's language-native
//! pickle.

use std::path::{Path, PathBuf};

use ahash::RandomState;
use hashbrown::HashMap;

use hkv_common::error::StorageError;
use hkv_common::value::Value;

fn keys_path(prefix: &Path) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push("_keys");
    PathBuf::from(path)
}

fn moes_path(prefix: &Path) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push("_moes");
    PathBuf::from(path)
}

pub fn save(
    prefix: &Path,
    values: &HashMap<String, Value, RandomState>,
    deadlines: &HashMap<String, f64, RandomState>,
) -> Result<(), StorageError> {
    let values_plain: std::collections::HashMap<String, Value> =
        values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let keys_file = keys_path(prefix);
    let bytes = bincode::serialize(&values_plain).map_err(|source| StorageError::Decode {
        path: keys_file.clone(),
        source,
    })?;
    std::fs::write(&keys_file, bytes).map_err(|source| StorageError::Io {
        path: keys_file.clone(),
        source,
    })?;

    let deadlines_plain: std::collections::HashMap<String, f64> =
        deadlines.iter().map(|(k, v)| (k.clone(), *v)).collect();
    let moes_file = moes_path(prefix);
    let bytes = bincode::serialize(&deadlines_plain).map_err(|source| StorageError::Decode {
        path: moes_file.clone(),
        source,
    })?;
    std::fs::write(&moes_file, bytes).map_err(|source| StorageError::Io {
        path: moes_file.clone(),
        source,
    })?;

    Ok(())
}

/// Loads the two sibling files. A missing keys file yields an empty store
/// (not an error); a missing moes file when the keys file is present is an
/// error, since every deadline must name a live key.
pub fn load(
    prefix: &Path,
) -> Result<
    (
        HashMap<String, Value, RandomState>,
        HashMap<String, f64, RandomState>,
    ),
    StorageError,
> {
    let keys_file = keys_path(prefix);
    if !keys_file.exists() {
        return Ok((HashMap::default(), HashMap::default()));
    }

    let bytes = std::fs::read(&keys_file).map_err(|source| StorageError::Io {
        path: keys_file.clone(),
        source,
    })?;
    let values_plain: std::collections::HashMap<String, Value> =
        bincode::deserialize(&bytes).map_err(|source| StorageError::Decode {
            path: keys_file.clone(),
            source,
        })?;

    let moes_file = moes_path(prefix);
    if !moes_file.exists() {
        return Err(StorageError::MissingDeadlines(moes_file));
    }
    let bytes = std::fs::read(&moes_file).map_err(|source| StorageError::Io {
        path: moes_file.clone(),
        source,
    })?;
    let deadlines_plain: std::collections::HashMap<String, f64> =
        bincode::deserialize(&bytes).map_err(|source| StorageError::Decode {
            path: moes_file.clone(),
            source,
        })?;

    let values = values_plain.into_iter().collect();
    let deadlines = deadlines_plain.into_iter().collect();
    Ok((values, deadlines))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("storage");
        let (values, deadlines) = load(&prefix).unwrap();
        assert!(values.is_empty());
        assert!(deadlines.is_empty());
    }

    #[test]
    fn missing_moes_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("storage");
        std::fs::write(keys_path(&prefix), b"not even valid, just present").unwrap();
        let err = load(&prefix).unwrap_err();
        assert!(matches!(err, StorageError::MissingDeadlines(_)));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("storage");

        let mut values: HashMap<String, Value, RandomState> = HashMap::default();
        values.insert("a".to_string(), Value::Str("one".to_string()));
        values.insert(
            "b".to_string(),
            Value::List(vec!["x".to_string(), "y".to_string()]),
        );
        let mut hash = std::collections::HashMap::new();
        hash.insert("f".to_string(), "v".to_string());
        values.insert("c".to_string(), Value::Hash(hash));

        let mut deadlines: HashMap<String, f64, RandomState> = HashMap::default();
        deadlines.insert("a".to_string(), 12345.6789);

        save(&prefix, &values, &deadlines).unwrap();
        let (loaded_values, loaded_deadlines) = load(&prefix).unwrap();

        assert_eq!(loaded_values.get("a"), values.get("a"));
        assert_eq!(loaded_values.get("b"), values.get("b"));
        assert_eq!(loaded_values.get("c"), values.get("c"));
        assert_eq!(loaded_deadlines.get("a"), Some(&12345.6789));
    }
}
