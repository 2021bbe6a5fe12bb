//! Database-backed key map storage.
//!
//! Stores key map entries in a PostgreSQL table within the configured state
//! schema (default `_deep_copy`). Keys are stored as their JSON text so any
//! [`CopyKey`] type round-trips. Preferred over the file journal when the
//! copy runs on hosts without durable local disk.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::info;

use super::backend::KeyMapStore;
use super::{CopyKey, KeyMapEntry};
use crate::error::{CopyError, Result};

/// PostgreSQL key map backend.
pub struct PgKeyMapStore {
    pool: Pool,
    schema: String,
    read_only: bool,
}

impl PgKeyMapStore {
    /// Create a backend storing entries in `schema.key_map`.
    pub fn new(pool: Pool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            read_only: false,
        }
    }

    /// Read an existing `schema.key_map` without creating or writing anything.
    pub fn read_only(pool: Pool, schema: &str) -> Self {
        Self {
            read_only: true,
            ..Self::new(pool, schema)
        }
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, context))
    }
}

#[async_trait]
impl<K: CopyKey> KeyMapStore<K> for PgKeyMapStore {
    async fn initialize(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let conn = self.client("initializing key map schema").await?;

        conn.execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}.key_map (
                    step_name TEXT NOT NULL,
                    source_key TEXT NOT NULL,
                    dest_key TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (step_name, source_key)
                )",
                self.schema
            ),
            &[],
        )
        .await?;

        info!("Key map table ready in schema {}", self.schema);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<KeyMapEntry<K>>> {
        let conn = self.client("loading key map").await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT step_name, source_key, dest_key
                     FROM {}.key_map
                     ORDER BY created_at, step_name",
                    self.schema
                ),
                &[],
            )
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let step: String = row.get(0);
            let source: String = row.get(1);
            let dest: String = row.get(2);

            entries.push(KeyMapEntry {
                step,
                source: serde_json::from_str(&source)?,
                dest: serde_json::from_str(&dest)?,
            });
        }

        Ok(entries)
    }

    async fn append(&self, entry: &KeyMapEntry<K>) -> Result<()> {
        if self.read_only {
            return Err(CopyError::Store(format!(
                "key map table {}.key_map is open read-only",
                self.schema
            )));
        }
        let conn = self.client("appending key map entry").await?;

        let source = serde_json::to_string(&entry.source)?;
        let dest = serde_json::to_string(&entry.dest)?;

        // Plain INSERT: a primary key conflict means a duplicate mapping and must surface
        conn.execute(
            &format!(
                "INSERT INTO {}.key_map (step_name, source_key, dest_key)
                 VALUES ($1, $2, $3)",
                self.schema
            ),
            &[&entry.step, &source, &dest],
        )
        .await?;

        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
