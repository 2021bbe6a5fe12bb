//! Key map backend trait.
//!
//! The [`KeyMapStore`] trait defines how key map entries are persisted.
//! [`KeyMap`](super::KeyMap) works with `Arc<dyn KeyMapStore<K>>` without
//! knowing the concrete backend.

use async_trait::async_trait;

use super::{CopyKey, KeyMapEntry};
use crate::error::Result;

/// Durable storage for key map entries.
///
/// Implementations must be read-your-writes consistent: an entry accepted by
/// [`append`](Self::append) is returned by every later [`load`](Self::load).
/// They are used sequentially by one run at a time.
#[async_trait]
pub trait KeyMapStore<K: CopyKey>: Send + Sync {
    /// Prepare the storage (create tables, directories).
    ///
    /// This should be idempotent - safe to call multiple times.
    async fn initialize(&self) -> Result<()>;

    /// Load every persisted entry.
    async fn load(&self) -> Result<Vec<KeyMapEntry<K>>>;

    /// Durably persist one new entry before returning.
    async fn append(&self, entry: &KeyMapEntry<K>) -> Result<()>;

    /// Whether entries survive the process.
    fn is_durable(&self) -> bool {
        true
    }

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}
