//! File-based key map backend.
//!
//! Entries are appended to a JSON-lines journal, one entry per line, and each
//! append is synced to disk before it returns. A crash can at worst leave a
//! torn final line; [`load`](FileKeyMapStore::load) drops it and truncates the
//! journal back to the last complete entry.
//!
//! [`FileKeyMapStore::read_only`] opens a journal for inspection while another
//! process may still be appending: nothing is created, repaired or written.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::backend::KeyMapStore;
use super::{CopyKey, KeyMapEntry};
use crate::error::{CopyError, Result};

/// Append-only JSON-lines key map journal.
pub struct FileKeyMapStore {
    path: PathBuf,
    writer: Mutex<Option<File>>,
    read_only: bool,
}

impl FileKeyMapStore {
    /// Create a backend writing to `path`. The file is created on first append.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
            read_only: false,
        }
    }

    /// Open `path` for reading only. A torn tail is skipped but left on disk.
    pub fn read_only(path: impl AsRef<Path>) -> Self {
        Self {
            read_only: true,
            ..Self::new(path)
        }
    }

    /// Journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn repair(&self, valid_len: usize, needs_newline: bool) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.set_len(valid_len as u64).await?;
        if needs_newline {
            let mut file = OpenOptions::new().append(true).open(&self.path).await?;
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        } else {
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<K: CopyKey> KeyMapStore<K> for FileKeyMapStore {
    async fn initialize(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<KeyMapEntry<K>>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut valid_len = 0usize;
        let mut torn = false;
        let mut needs_newline = false;

        for (idx, line) in content.split_inclusive(|b| *b == b'\n').enumerate() {
            let complete = line.ends_with(b"\n");
            let text = line.trim_ascii();
            if text.is_empty() {
                valid_len += line.len();
                continue;
            }

            match serde_json::from_slice::<KeyMapEntry<K>>(text) {
                Ok(entry) => {
                    entries.push(entry);
                    valid_len += line.len();
                    needs_newline = !complete;
                }
                Err(e) if !complete => {
                    warn!(
                        "Dropping torn final entry at {}:{} ({})",
                        self.path.display(),
                        idx + 1,
                        e
                    );
                    torn = true;
                }
                Err(e) => {
                    return Err(CopyError::Store(format!(
                        "invalid key map entry at {}:{}: {}",
                        self.path.display(),
                        idx + 1,
                        e
                    )));
                }
            }
        }

        if (torn || needs_newline) && !self.read_only {
            self.repair(valid_len, needs_newline).await?;
        }

        debug!(
            "Read {} key map entries from {}",
            entries.len(),
            self.path.display()
        );
        Ok(entries)
    }

    async fn append(&self, entry: &KeyMapEntry<K>) -> Result<()> {
        if self.read_only {
            return Err(CopyError::Store(format!(
                "key map journal {} is open read-only",
                self.path.display()
            )));
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *writer = Some(file);
        }
        let file = writer
            .as_mut()
            .ok_or_else(|| CopyError::store("key map journal is not open"))?;

        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
