//! Configuration management: a dotted-key view over nested JSON plus the
//! engine settings derived from it.
//!
//! The host loads a JSON document (file or inline), wraps it in [`Config`],
//! and hands it to the engine builder. Lookups use dotted paths
//! (`cache.default`, `cache.stores.file.root`) so nested sections stay
//! ergonomic without inventing a new format.

pub mod settings;

use log::{debug, warn};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Maximum accepted configuration file size.
const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

/// Immutable configuration map with dotted-path accessors.
#[derive(Debug, Clone, Default)]
pub struct Config {
    root: Map<String, Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already-parsed JSON object.
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(format!(
                "configuration root must be a JSON object, got {}",
                type_name(&other)
            )),
        }
    }

    /// Loads configuration from a JSON file with the same safety checks the
    /// settings loader applies: path canonicalization, size cap, and a
    /// warning when the file escapes the working directory.
    pub fn from_file(path: &str) -> Result<Self, String> {
        debug!("Loading configuration from: {}", path);

        let path_ref = Path::new(path);
        if !path_ref.exists() {
            return Err(format!("Cannot resolve config path '{}'", path));
        }

        let canonical = path_ref
            .canonicalize()
            .map_err(|e| format!("Cannot resolve config path '{}': {}", path, e))?;

        if let Ok(current_dir) = std::env::current_dir() {
            if !canonical.starts_with(&current_dir) {
                warn!("Config path '{}' is outside working directory", path);
            }
        }

        let metadata =
            fs::metadata(&canonical).map_err(|e| format!("Cannot read config metadata: {}", e))?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(format!(
                "Config file too large: {} bytes (max: {} bytes)",
                metadata.len(),
                MAX_CONFIG_SIZE
            ));
        }

        let data =
            fs::read_to_string(&canonical).map_err(|e| format!("Cannot read config file: {}", e))?;
        let value: Value =
            serde_json::from_str(&data).map_err(|e| format!("Invalid JSON: {}", e))?;

        let config = Self::from_value(value)?;
        debug!("Successfully loaded configuration ({} top-level keys)", config.root.len());
        Ok(config)
    }

    /// Resolves a dotted path to the raw JSON value.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current: &Value = &Value::Null;
        let mut first = true;
        for part in path.split('.') {
            current = if first {
                first = false;
                self.root.get(part)?
            } else {
                current.as_object()?.get(part)?
            };
        }
        if first {
            None
        } else {
            Some(current)
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// String array at `path`; scalar strings are wrapped as one element.
    pub fn get_strs(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Object section at `path`, cloned.
    pub fn get_map(&self, path: &str) -> Option<Map<String, Value>> {
        self.get(path).and_then(Value::as_object).cloned()
    }

    /// Sets a dotted path, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut parts = path.split('.').peekable();
        let mut current = &mut self.root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                current.insert(part.to_string(), value);
                return;
            }
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut().expect("entry forced to object");
        }
    }

    pub fn as_object(&self) -> &Map<String, Value> {
        &self.root
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
