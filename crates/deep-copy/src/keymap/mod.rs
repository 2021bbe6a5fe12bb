//! Key map: durable `(step, source key) → destination key` mapping.
//!
//! The [`KeyMap`] is the in-memory index every step consults. It is backed by a
//! [`KeyMapStore`] that decides durability:
//!
//! - [`NoOpKeyMapStore`]: memory only, for single-transaction copies
//! - [`FileKeyMapStore`]: append-only JSON-lines journal
//! - [`PgKeyMapStore`]: PostgreSQL table
//!
//! Entries are append-only. A mapping is persisted to the backend before it
//! becomes visible in memory, so the index never claims a row the backend
//! would forget after a crash.

mod backend;
mod db;
mod file;
mod noop;

pub use backend::KeyMapStore;
pub use db::PgKeyMapStore;
pub use file::FileKeyMapStore;
pub use noop::NoOpKeyMapStore;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::error::{CopyError, Result};

/// Identifier types usable as source and destination keys.
pub trait CopyKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CopyKey for T where
    T: Clone
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A key of unknown type, held as its canonical JSON text.
///
/// Lets tooling read any key map or bridge store without knowing which key
/// type the run used. `42` and `"42"` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpaqueKey(String);

impl OpaqueKey {
    /// Parse a key from user input: JSON if it parses, otherwise a JSON string.
    pub fn parse(input: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(input) {
            Ok(value) => Self(value.to_string()),
            Err(_) => Self(serde_json::Value::String(input.to_string()).to_string()),
        }
    }

    /// Canonical JSON text of the key.
    pub fn as_json(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpaqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for OpaqueKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let value: serde_json::Value =
            serde_json::from_str(&self.0).map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OpaqueKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.is_null() {
            return Err(D::Error::custom("key cannot be null"));
        }
        Ok(Self(value.to_string()))
    }
}

/// One persisted mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "K: CopyKey")]
pub struct KeyMapEntry<K: CopyKey> {
    /// Step namespace.
    pub step: String,
    /// Key of the row in the source store.
    pub source: K,
    /// Key the destination store assigned to the copy.
    pub dest: K,
}

/// In-memory key map index over a durable backend.
pub struct KeyMap<K: CopyKey> {
    steps: HashMap<String, HashMap<K, K>>,
    store: Arc<dyn KeyMapStore<K>>,
    initialized: bool,
}

impl<K: CopyKey> KeyMap<K> {
    /// Create an empty key map over `store`. Call [`initialize`](Self::initialize)
    /// to load previously persisted entries.
    pub fn new(store: Arc<dyn KeyMapStore<K>>) -> Self {
        Self {
            steps: HashMap::new(),
            store,
            initialized: false,
        }
    }

    /// A key map that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoOpKeyMapStore::new()))
    }

    /// Load existing entries from the backend, replacing anything in memory.
    pub async fn initialize(&mut self) -> Result<()> {
        self.store.initialize().await?;
        let entries = self.store.load().await?;

        self.steps.clear();
        let count = entries.len();
        for entry in entries {
            let step_map = self.steps.entry(entry.step.clone()).or_default();
            if step_map.contains_key(&entry.source) {
                return Err(CopyError::DuplicateKey {
                    step: entry.step,
                    key: entry.source.to_string(),
                });
            }
            step_map.insert(entry.source, entry.dest);
        }

        self.initialized = true;
        info!(
            "Loaded {} key map entries from {} backend",
            count,
            self.store.backend_type()
        );
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the backend survives the process.
    pub fn is_durable(&self) -> bool {
        self.store.is_durable()
    }

    /// Backend type name for logging.
    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }

    /// Whether `source` was already copied by `step`.
    pub fn contains_key(&self, step: &str, source: &K) -> bool {
        self.steps
            .get(step)
            .map(|m| m.contains_key(source))
            .unwrap_or(false)
    }

    /// Record a new mapping, persisting it before it becomes visible.
    ///
    /// Fails with [`CopyError::DuplicateKey`] if `(step, source)` is already mapped;
    /// existing entries are never overwritten.
    pub async fn add(&mut self, step: &str, source: K, dest: K) -> Result<()> {
        if self.contains_key(step, &source) {
            return Err(CopyError::DuplicateKey {
                step: step.to_string(),
                key: source.to_string(),
            });
        }

        let entry = KeyMapEntry {
            step: step.to_string(),
            source,
            dest,
        };
        self.store.append(&entry).await?;
        debug!(step = %entry.step, source_key = %entry.source, dest_key = %entry.dest, "Mapped key");

        self.steps
            .entry(entry.step)
            .or_default()
            .insert(entry.source, entry.dest);
        Ok(())
    }

    /// Destination key for `source` as copied by `step`.
    ///
    /// Fails with [`CopyError::KeyNotFound`] when the parent row was never copied.
    pub fn resolve(&self, step: &str, source: &K) -> Result<K> {
        self.get(step, source)
            .cloned()
            .ok_or_else(|| CopyError::KeyNotFound {
                step: step.to_string(),
                key: source.to_string(),
            })
    }

    /// Destination key for `source`, if mapped.
    pub fn get(&self, step: &str, source: &K) -> Option<&K> {
        self.steps.get(step).and_then(|m| m.get(source))
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.steps.values().map(HashMap::len).sum()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries recorded by `step`.
    pub fn step_len(&self, step: &str) -> usize {
        self.steps.get(step).map(HashMap::len).unwrap_or(0)
    }

    /// Step names with their entry counts, sorted by name.
    pub fn steps(&self) -> Vec<(String, usize)> {
        let mut steps: Vec<_> = self
            .steps
            .iter()
            .map(|(name, m)| (name.clone(), m.len()))
            .collect();
        steps.sort();
        steps
    }

    /// Iterate over `(source, dest)` pairs recorded by `step`.
    pub fn step_entries<'a>(&'a self, step: &str) -> impl Iterator<Item = (&'a K, &'a K)> + 'a {
        self.steps.get(step).into_iter().flat_map(|m| m.iter())
    }
}

impl<K: CopyKey> fmt::Debug for KeyMap<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMap")
            .field("backend", &self.store.backend_type())
            .field("entries", &self.len())
            .field("initialized", &self.initialized)
            .finish()
    }
}
