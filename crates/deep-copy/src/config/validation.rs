//! Configuration validation.

use super::{BridgeBackend, Config, KeyMapBackend};
use crate::error::{CopyError, Result};
use crate::store::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    match config.key_map.backend {
        KeyMapBackend::Memory => {}
        KeyMapBackend::File => {
            if config.key_map.path.is_none() {
                return Err(CopyError::Config(
                    "key_map.path is required for the file backend".into(),
                ));
            }
        }
        KeyMapBackend::Postgres => {
            let pg = config.key_map.postgres.as_ref().ok_or_else(|| {
                CopyError::Config("key_map.postgres is required for the postgres backend".into())
            })?;
            if pg.host.is_empty() {
                return Err(CopyError::Config("key_map.postgres.host is required".into()));
            }
            if pg.database.is_empty() {
                return Err(CopyError::Config(
                    "key_map.postgres.database is required".into(),
                ));
            }
            if pg.user.is_empty() {
                return Err(CopyError::Config("key_map.postgres.user is required".into()));
            }
            if pg.max_connections == 0 {
                return Err(CopyError::Config(
                    "key_map.postgres.max_connections must be at least 1".into(),
                ));
            }
            if !is_plain_identifier(&pg.schema) {
                return Err(CopyError::Config(format!(
                    "key_map.postgres.schema '{}' must be a plain identifier",
                    pg.schema
                )));
            }
            SslMode::parse(&pg.ssl_mode)?;
        }
    }

    if config.bridge.backend == BridgeBackend::File && config.bridge.path.is_none() {
        return Err(CopyError::Config(
            "bridge.path is required for the file backend".into(),
        ));
    }

    if config.copy.max_errors == 0 {
        return Err(CopyError::Config(
            "copy.max_errors must be at least 1".into(),
        ));
    }
    if config.copy.chunk_size == 0 {
        return Err(CopyError::Config(
            "copy.chunk_size must be at least 1".into(),
        ));
    }

    Ok(())
}

/// The schema name is interpolated into DDL, so only `[A-Za-z_][A-Za-z0-9_]*` is allowed.
fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
