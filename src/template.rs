// SPDX-License-Identifier: AGPL-3.0-or-later
//! YAML document helpers
//!
//! Generated configs are built as a base document (embedded default or an
//! operator-supplied file) with generated values merged over it. Patching
//! of third-party generated files uses the same dotted-path helpers.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::{Result, RoostError};

pub const CORE_TEMPLATE: &str = include_str!("../templates/core.yaml");
pub const ORDERER_TEMPLATE: &str = include_str!("../templates/orderer.yaml");
pub const CONFIGTX_TEMPLATE: &str = include_str!("../templates/configtx.yaml");

/// Parse the operator file if given, else the embedded default
pub fn load_base(custom: Option<&Path>, embedded: &str) -> Result<Value> {
    let value = match custom {
        Some(path) => read_yaml(path)?,
        None => serde_yaml::from_str(embedded)?,
    };
    Ok(value)
}

/// Read and parse a YAML file
pub fn read_yaml(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| RoostError::MalformedDocument {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Serialize and write, creating parent directories
pub fn write_yaml(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_yaml::to_string(value)?)?;
    Ok(())
}

/// Deep-merge `overlay` into `base`; mappings merge key by key, anything else replaces
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Mapping from `(key, value)` pairs, preserving order
pub fn mapping<I, K, V>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Value>,
    V: Into<Value>,
{
    let mut map = Mapping::new();
    for (k, v) in entries {
        map.insert(k.into(), v.into());
    }
    Value::Mapping(map)
}

/// Set `a.b.c`, creating intermediate mappings
pub fn set_path(root: &mut Value, path: &str, value: impl Into<Value>) {
    let mut current = root;
    for key in path.split('.') {
        if !current.is_mapping() {
            *current = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = current else {
            unreachable!("just replaced with a mapping")
        };
        current = map
            .entry(Value::from(key))
            .or_insert(Value::Null);
    }
    *current = value.into();
}

/// Look up `a.b.c`
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, key| current.get(key))
}

/// Remove the last key of `a.b.c`; returns whether it existed
pub fn remove_path(root: &mut Value, path: &str) -> bool {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    };
    let container = match parent {
        Some(parent) => parent
            .split('.')
            .try_fold(&mut *root, |current, key| current.get_mut(key)),
        None => Some(root),
    };
    match container {
        Some(Value::Mapping(map)) => map.remove(last).is_some(),
        _ => false,
    }
}

/// Append strings to the sequence at `path`, skipping ones already present
pub fn extend_unique(root: &mut Value, path: &str, items: &[String]) {
    let mut existing: Vec<Value> = match get_path(root, path) {
        Some(Value::Sequence(seq)) => seq.clone(),
        _ => Vec::new(),
    };
    for item in items {
        let value = Value::from(item.as_str());
        if !existing.contains(&value) {
            existing.push(value);
        }
    }
    set_path(root, path, Value::Sequence(existing));
}
