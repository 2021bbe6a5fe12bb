//! No-op key map backend for copies that do not need resume.
//!
//! Used by the single-transaction strategy, where the key map only has to
//! live as long as the transaction. Entries are never persisted.

use async_trait::async_trait;

use super::backend::KeyMapStore;
use super::{CopyKey, KeyMapEntry};
use crate::error::Result;

/// Key map backend that doesn't persist anything.
#[derive(Debug, Default)]
pub struct NoOpKeyMapStore;

impl NoOpKeyMapStore {
    /// Create a new no-op backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<K: CopyKey> KeyMapStore<K> for NoOpKeyMapStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<KeyMapEntry<K>>> {
        // Nothing was ever persisted
        Ok(Vec::new())
    }

    async fn append(&self, _entry: &KeyMapEntry<K>) -> Result<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
