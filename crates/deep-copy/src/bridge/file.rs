//! Directory-backed bridge store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<step>/chunk-000000.json
//! <root>/<step>/chunk-000001.json
//! ```
//!
//! Step names are percent-encoded into directory names. Chunks are written to
//! a temp file and renamed into place, so a crash never leaves a half-written
//! chunk behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{BridgeStore, StagedRow};
use crate::error::{CopyError, Result};

const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_SUFFIX: &str = ".json";

/// Bridge store writing one JSON file per chunk.
#[derive(Debug, Clone)]
pub struct FileBridgeStore {
    root: PathBuf,
}

impl FileBridgeStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn step_dir(&self, step: &str) -> PathBuf {
        self.root.join(encode_step(step))
    }

    fn chunk_path(&self, step: &str, index: usize) -> PathBuf {
        self.step_dir(step)
            .join(format!("{}{:06}{}", CHUNK_PREFIX, index, CHUNK_SUFFIX))
    }
}

#[async_trait]
impl BridgeStore for FileBridgeStore {
    async fn clear(&self, step: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.step_dir(step)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_chunk(&self, step: &str, rows: Vec<StagedRow>) -> Result<usize> {
        let dir = self.step_dir(step);
        tokio::fs::create_dir_all(&dir).await?;

        let index = self.chunk_count(step).await?;
        let path = self.chunk_path(step, index);
        let content = serde_json::to_vec(&rows)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(step = %step, chunk = index, rows = rows.len(), "Staged chunk");
        Ok(index)
    }

    async fn chunk_count(&self, step: &str) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(self.step_dir(step)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(CHUNK_PREFIX) && name.ends_with(CHUNK_SUFFIX) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn load_chunk(&self, step: &str, index: usize) -> Result<Vec<StagedRow>> {
        let path = self.chunk_path(step, index);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CopyError::Store(format!(
                    "no chunk {} staged for step {}",
                    index, step
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    async fn steps(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut steps = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(step) = decode_step(&name) else {
                continue;
            };
            if self.chunk_count(&step).await? > 0 {
                steps.push(step);
            }
        }
        steps.sort();
        Ok(steps)
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

fn encode_step(step: &str) -> String {
    let mut out = String::with_capacity(step.len());
    for b in step.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_step(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
