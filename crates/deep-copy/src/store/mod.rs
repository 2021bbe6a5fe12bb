//! Store handles the copy engine drives.
//!
//! Steps talk to their source and destination through handle types they
//! choose themselves; the engine never builds SQL. The only capability the
//! engine itself needs from a handle is [`TransactionalStore`], used by the
//! single-transaction strategy. PostgreSQL support lives in [`postgres`].

mod postgres;
mod tls;

pub use postgres::connect_pool;
pub use tls::SslMode;

use async_trait::async_trait;

use crate::error::Result;

/// A store handle that can wrap work in one transaction.
///
/// The handle itself is used for every read and write between
/// [`begin`](Self::begin) and [`commit`](Self::commit) /
/// [`rollback`](Self::rollback).
#[async_trait]
pub trait TransactionalStore: Send {
    /// Open a transaction on this handle.
    async fn begin(&mut self) -> Result<()>;

    /// Make every write since [`begin`](Self::begin) visible.
    async fn commit(&mut self) -> Result<()>;

    /// Discard every write since [`begin`](Self::begin).
    async fn rollback(&mut self) -> Result<()>;
}
