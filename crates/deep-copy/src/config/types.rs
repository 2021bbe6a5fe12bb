//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default number of combined row failures after which a step stops early.
pub const DEFAULT_MAX_ERRORS: usize = 10;

/// Default number of rows per staged chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 30;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Durable key map backend.
    #[serde(default)]
    pub key_map: KeyMapConfig,

    /// Bridge store backend for staged copies.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Step execution behavior.
    #[serde(default)]
    pub copy: CopyConfig,
}

/// Key map backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMapBackend {
    /// Memory only; nothing survives the process.
    #[default]
    Memory,
    /// Append-only JSON-lines journal on local disk.
    File,
    /// PostgreSQL table.
    Postgres,
}

/// Key map configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyMapConfig {
    /// Backend type (default: memory).
    #[serde(default)]
    pub backend: KeyMapBackend,

    /// Journal path (file backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Connection settings (postgres backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,
}

/// Bridge store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeBackend {
    /// Memory only.
    #[default]
    Memory,
    /// One directory per step, one JSON file per chunk.
    File,
}

/// Bridge store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Backend type (default: memory).
    #[serde(default)]
    pub backend: BridgeBackend,

    /// Root directory (file backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Step execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Combined create + insert failures after which a step stops (default: 10).
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    /// Rows per staged chunk (default: 30).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// PostgreSQL connection settings for durable collaborators.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the key map table (default: "_deep_copy").
    #[serde(default = "default_state_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

fn default_max_errors() -> usize {
    DEFAULT_MAX_ERRORS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_pg_port() -> u16 {
    5432
}

fn default_state_schema() -> String {
    "_deep_copy".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_max_connections() -> usize {
    4
}
