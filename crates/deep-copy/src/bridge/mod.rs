//! Bridge store: staging area for copies whose source and destination are
//! never reachable at the same time.
//!
//! A staging pass writes a step's source rows as numbered chunks; a later
//! commit pass reads them back in order. Rows are held as JSON so one store
//! can carry every step's row type.

mod file;
mod memory;

pub use file::FileBridgeStore;
pub use memory::MemoryBridgeStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One staged source row with its source key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRow {
    /// Source key, as JSON.
    pub key: Value,
    /// The source row, as JSON.
    pub row: Value,
}

/// Durable chunk storage namespaced by step name.
///
/// Clearing one step never touches another step's chunks.
#[async_trait]
pub trait BridgeStore: Send + Sync {
    /// Remove every chunk staged for `step`.
    async fn clear(&self, step: &str) -> Result<()>;

    /// Append the next chunk for `step` and return its index.
    async fn save_chunk(&self, step: &str, rows: Vec<StagedRow>) -> Result<usize>;

    /// Number of chunks staged for `step`.
    async fn chunk_count(&self, step: &str) -> Result<usize>;

    /// Rows of chunk `index` for `step`, in staging order.
    async fn load_chunk(&self, step: &str, index: usize) -> Result<Vec<StagedRow>>;

    /// Staged row with source key `key`, if any.
    async fn get(&self, step: &str, key: &Value) -> Result<Option<Value>> {
        for index in 0..self.chunk_count(step).await? {
            let chunk = self.load_chunk(step, index).await?;
            if let Some(staged) = chunk.into_iter().find(|r| &r.key == key) {
                return Ok(Some(staged.row));
            }
        }
        Ok(None)
    }

    /// Steps that currently have staged chunks, sorted by name.
    async fn steps(&self) -> Result<Vec<String>>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// Fetch and deserialize the row staged for `step` under source key `key`.
pub async fn fetch<K, R>(store: &dyn BridgeStore, step: &str, key: &K) -> Result<Option<R>>
where
    K: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let key = serde_json::to_value(key)?;
    match store.get(step, &key).await? {
        Some(row) => Ok(Some(serde_json::from_value(row)?)),
        None => Ok(None),
    }
}

/// Total rows staged for `step` across all chunks.
pub async fn staged_rows(store: &dyn BridgeStore, step: &str) -> Result<usize> {
    let mut total = 0;
    for index in 0..store.chunk_count(step).await? {
        total += store.load_chunk(step, index).await?.len();
    }
    Ok(total)
}
