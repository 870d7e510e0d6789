//! # Configuration
//!
//! A string key/value store with dotted keys (`queue.name`,
//! `thumbnail.width`). Applications layer it however they like: defaults
//! first, then a `.env` file, then the process environment.
//!
//! ```rust
//! use lens_core::LensConfig;
//!
//! let mut config = LensConfig::new();
//! config.set("queue.name", "photos");
//! config.set("thumbnail.width", "100");
//!
//! let snap = config.snapshot();
//! assert_eq!(snap.get("queue.name"), Some("photos"));
//! assert_eq!(snap.get_u32("thumbnail.width"), Some(100));
//! ```
//!
//! Environment variables use a prefix and `__` as the separator:
//! `LENS__QUEUE__NAME=photos` becomes `queue.name`.

use std::collections::HashMap;
use std::str::FromStr;

/// Prefix recognized by [`LensConfig::load_env`] callers by default.
pub const ENV_PREFIX: &str = "LENS__";

#[derive(Debug, Default, Clone)]
pub struct LensConfig {
    values: HashMap<String, String>,
}

impl LensConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Seed the store from `(key, value)` pairs.
    pub fn with_defaults<I, K, V>(defaults: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::new();
        config.extend(defaults);
        config
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in pairs {
            self.set(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Overlay variables whose name starts with `prefix`.
    ///
    /// `PREFIX` + `STORAGE__CHUNK_SIZE` → `storage.chunk_size`.
    pub fn load_env(&mut self, prefix: &str) -> usize {
        self.load_vars(prefix, std::env::vars())
    }

    /// Same as [`load_env`](Self::load_env) over an explicit iterator.
    pub fn load_vars<I>(&mut self, prefix: &str, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut loaded = 0;
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                if stripped.is_empty() {
                    continue;
                }
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.values.insert(normalized, value);
                loaded += 1;
            }
        }
        loaded
    }

    pub fn snapshot(&self) -> LensConfigSnapshot {
        LensConfigSnapshot::new(self.values.clone())
    }
}

/// Read-only view handed to components at startup.
#[derive(Debug, Clone, Default)]
pub struct LensConfigSnapshot {
    map: HashMap<String, String>,
}

impl LensConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Parse a value, `None` when absent or unparsable.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse::<T>().ok())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get_parsed(key)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_parsed(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_parsed(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_parsed(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        let mut config = LensConfig::with_defaults([("queue.name", "photos"), ("worker.concurrency", "1")]);
        let loaded = config.load_vars(
            ENV_PREFIX,
            vec![
                ("LENS__WORKER__CONCURRENCY".to_string(), "4".to_string()),
                ("LENS__STORAGE__CHUNK_SIZE".to_string(), "1024".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ],
        );

        assert_eq!(loaded, 2);
        let snap = config.snapshot();
        assert_eq!(snap.get("queue.name"), Some("photos"));
        assert_eq!(snap.get_usize("worker.concurrency"), Some(4));
        assert_eq!(snap.get_u64("storage.chunk_size"), Some(1024));
        assert!(snap.get("home").is_none());
    }

    #[test]
    fn bare_prefix_is_ignored() {
        let mut config = LensConfig::new();
        let loaded = config.load_vars(ENV_PREFIX, vec![("LENS__".to_string(), "x".to_string())]);
        assert_eq!(loaded, 0);
        assert!(!config.has(""));
    }

    #[test]
    fn unparsable_values_read_as_none() {
        let mut config = LensConfig::new();
        config.set("thumbnail.quality", "high");
        config.set("log.json", "true");
        let snap = config.snapshot();
        assert_eq!(snap.get_u32("thumbnail.quality"), None);
        assert_eq!(snap.get_bool("log.json"), Some(true));
        assert_eq!(snap.get_or("missing", "fallback"), "fallback");
    }
}
