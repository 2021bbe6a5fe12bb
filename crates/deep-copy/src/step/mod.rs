//! The unit of copy work and the engine that runs it.
//!
//! A [`Step`] copies every source row of one entity type that belongs to the
//! run's parameter. Steps supply four operations (query, key, create, insert);
//! the [`StepEngine`] owns everything else: resume skipping, failure
//! classification and isolation, the error threshold, key map recording,
//! cancellation and metrics.

mod engine;

pub use engine::{StepEngine, StepOutcome};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::keymap::{CopyKey, KeyMap};

/// Source rows produced by [`Step::query_rows`].
///
/// An error item means the source failed mid-iteration and ends the step.
pub type RowStream<'a, T> = BoxStream<'a, Result<T>>;

/// Copy logic for one entity type.
///
/// `name()` is the step's stable identity: it namespaces the step's key map
/// entries and staged chunks, so renaming a step forgets its progress.
#[async_trait]
pub trait Step: Send + Sync {
    /// Key type of both stores.
    type Key: CopyKey;
    /// Scoping parameter of the run, e.g. the root key to copy.
    type Param: Send + Sync;
    /// Source store handle.
    type Source: Send;
    /// Destination store handle.
    type Dest: Send;
    /// Source row. Serializable so it can be staged and reported.
    type Row: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Row built for the destination.
    type NewRow: Serialize + Send + Sync;

    fn name(&self) -> &str;

    /// Row failures tolerated before the step stops; `None` uses the engine default.
    fn max_errors(&self) -> Option<usize> {
        None
    }

    /// Rows per staged chunk; `None` uses the orchestrator default.
    fn chunk_size(&self) -> Option<usize> {
        None
    }

    /// Query the source rows relevant to `param`.
    async fn query_rows<'a>(
        &'a self,
        source: &'a mut Self::Source,
        param: &'a Self::Param,
    ) -> Result<RowStream<'a, Self::Row>>;

    /// Source key of `row`. Must not fail.
    fn key(&self, row: &Self::Row) -> Self::Key;

    /// Build the destination row, resolving parent keys through `ctx`.
    fn create_row(
        &self,
        row: &Self::Row,
        ctx: &RowContext<'_, Self::Key, Self::Param>,
    ) -> Result<Self::NewRow>;

    /// Write `row` to the destination and return its new key.
    async fn insert_row(&self, dest: &mut Self::Dest, row: &Self::NewRow) -> Result<Self::Key>;

    /// Called once after the row loop, whatever the error count.
    async fn on_step_completed(&self, _dest: &mut Self::Dest, _param: &Self::Param) -> Result<()> {
        Ok(())
    }
}

/// What [`Step::create_row`] can see besides the row itself.
pub struct RowContext<'a, K: CopyKey, P> {
    key_map: &'a KeyMap<K>,
    param: &'a P,
    step: &'a str,
}

impl<'a, K: CopyKey, P> RowContext<'a, K, P> {
    pub(crate) fn new(key_map: &'a KeyMap<K>, param: &'a P, step: &'a str) -> Self {
        Self {
            key_map,
            param,
            step,
        }
    }

    /// Destination key of a row copied by `parent_step`.
    ///
    /// Fails with [`CopyError::KeyNotFound`](crate::CopyError::KeyNotFound)
    /// if that row has not been copied.
    pub fn resolve(&self, parent_step: &str, source: &K) -> Result<K> {
        self.key_map.resolve(parent_step, source)
    }

    /// The run's scoping parameter.
    pub fn param(&self) -> &P {
        self.param
    }

    /// Name of the step being run.
    pub fn step(&self) -> &str {
        self.step
    }

    pub fn key_map(&self) -> &KeyMap<K> {
        self.key_map
    }
}

/// How the engine treats a row-level (creating or inserting) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Count, report and continue with the next row until the error
    /// threshold is reached.
    #[default]
    Isolate,
    /// Report, then fail the step with the first row failure.
    Abort,
}
