//! In-process bridge store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BridgeStore, StagedRow};
use crate::error::{CopyError, Result};

/// Bridge store held in memory. Staged rows are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryBridgeStore {
    chunks: Mutex<HashMap<String, Vec<Vec<StagedRow>>>>,
}

impl MemoryBridgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Vec<StagedRow>>>>> {
        self.chunks
            .lock()
            .map_err(|_| CopyError::store("bridge store lock poisoned"))
    }
}

#[async_trait]
impl BridgeStore for MemoryBridgeStore {
    async fn clear(&self, step: &str) -> Result<()> {
        self.lock()?.remove(step);
        Ok(())
    }

    async fn save_chunk(&self, step: &str, rows: Vec<StagedRow>) -> Result<usize> {
        let mut chunks = self.lock()?;
        let step_chunks = chunks.entry(step.to_string()).or_default();
        step_chunks.push(rows);
        Ok(step_chunks.len() - 1)
    }

    async fn chunk_count(&self, step: &str) -> Result<usize> {
        Ok(self.lock()?.get(step).map(Vec::len).unwrap_or(0))
    }

    async fn load_chunk(&self, step: &str, index: usize) -> Result<Vec<StagedRow>> {
        self.lock()?
            .get(step)
            .and_then(|c| c.get(index))
            .cloned()
            .ok_or_else(|| CopyError::Store(format!("no chunk {} staged for step {}", index, step)))
    }

    async fn steps(&self) -> Result<Vec<String>> {
        let mut steps: Vec<String> = self
            .lock()?
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        steps.sort();
        Ok(steps)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
