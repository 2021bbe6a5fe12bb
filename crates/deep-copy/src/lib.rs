//! # deep-copy
//!
//! Resumable, idempotent multi-step copy engine for hierarchical relational
//! data.
//!
//! A copy is a sequence of [`Step`]s, one per entity type, run parents first.
//! Each step queries source rows, skips rows a previous run already copied,
//! builds destination rows (resolving parent keys through the [`KeyMap`]),
//! inserts them and records the new keys. Row failures are classified,
//! reported and isolated; a step that keeps failing trips an error threshold.
//!
//! Three orchestrators wrap the same engine:
//!
//! - [`LocalCopy`]: one transaction, all or nothing
//! - [`ConnectedCopy`]: two live stores, resumable via a durable key map
//! - [`StagedCopy`]: stage into a [`BridgeStore`] now, commit later
//!
//! ## Example
//!
//! ```rust,no_run
//! use deep_copy::{Config, KeyMap};
//!
//! # async fn example() -> deep_copy::Result<()> {
//! let config = Config::load("deep-copy.yaml")?;
//! let mut key_map = KeyMap::<i64>::new(config.key_map.open().await?);
//! key_map.initialize().await?;
//! for (step, entries) in key_map.steps() {
//!     println!("{}: {} rows copied", step, entries);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod keymap;
pub mod orchestrator;
pub mod report;
pub mod step;
pub mod store;

// Re-exports for convenient access
pub use bridge::{BridgeStore, FileBridgeStore, MemoryBridgeStore, StagedRow};
pub use config::{BridgeConfig, Config, CopyConfig, KeyMapConfig, PostgresConfig};
pub use error::{CopyError, ErrorLocation, Result};
pub use keymap::{CopyKey, KeyMap, KeyMapStore, OpaqueKey};
pub use orchestrator::{
    CommitRun, ConnectedCopy, ConnectedPlan, ConnectedRun, CopyOptions, CopyResult, LocalCopy,
    LocalPlan, LocalRun, RunStatus, StageRun, StageSummary, StagedCopy, StagedPlan,
};
pub use report::{ErrorReporter, MetricsSink, StepMetrics};
pub use step::{FailurePolicy, RowContext, RowStream, Step, StepEngine, StepOutcome};
pub use store::TransactionalStore;
pub use tokio_util::sync::CancellationToken;
