//! PostgreSQL connection helpers.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

use super::tls::SslMode;
use super::TransactionalStore;
use crate::config::PostgresConfig;
use crate::error::{CopyError, Result};

/// Build and verify a connection pool for `config`.
pub async fn connect_pool(config: &PostgresConfig) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match SslMode::parse(&config.ssl_mode)?.connector()? {
        Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        None => Manager::from_config(pg_config, NoTls, mgr_config),
    };

    let pool = Pool::builder(mgr)
        .max_size(config.max_connections)
        .build()
        .map_err(|e| CopyError::pool(e, "building PostgreSQL pool"))?;

    // Fail fast on bad credentials instead of on the first key map write
    let client = pool
        .get()
        .await
        .map_err(|e| CopyError::pool(e, "connecting to PostgreSQL"))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to PostgreSQL: {}:{}/{}",
        config.host, config.port, config.database
    );

    Ok(pool)
}

#[async_trait]
impl TransactionalStore for Client {
    async fn begin(&mut self) -> Result<()> {
        self.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}
