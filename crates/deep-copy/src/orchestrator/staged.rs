//! Two-phase copies through a bridge store.
//!
//! [`StagedCopy::stage`] reads source rows into chunks; [`StagedCopy::commit`]
//! later replays them against the destination. The two phases never need
//! both stores at once.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CopyOptions, CopyResult, RunClock};
use crate::bridge::{BridgeStore, StagedRow};
use crate::config::Config;
use crate::error::{CopyError, ErrorLocation, Result};
use crate::keymap::{CopyKey, KeyMap, KeyMapStore};
use crate::report::ErrorReporter;
use crate::step::{FailurePolicy, RowStream, Step, StepEngine, StepOutcome};

/// Steps of a staged copy. Both phases run the steps in dependency order.
#[async_trait]
pub trait StagedPlan: Send + Sync {
    type Key: CopyKey;
    type Param: Send + Sync;
    type Source: Send;
    type Dest: Send;
    type Output: Send;

    /// Stage each step through [`StageRun::step`].
    async fn stage(&self, run: &mut StageRun<'_, Self::Source>, param: &Self::Param) -> Result<()>;

    /// Commit each step through [`CommitRun::step`].
    async fn commit(
        &self,
        run: &mut CommitRun<'_, Self::Key, Self::Dest>,
        param: &Self::Param,
    ) -> Result<Self::Output>;
}

/// What staging wrote for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageSummary {
    pub step: String,
    pub rows: usize,
    pub chunks: usize,
    pub cancelled: bool,
    /// Why staging failed. Failed or cancelled steps keep no chunks.
    pub failure: Option<String>,
}

impl StageSummary {
    fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            ..Default::default()
        }
    }

    /// Staging ran to the end and its chunks are in the bridge store.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failure.is_none()
    }
}

/// A staging pass in progress.
pub struct StageRun<'a, Src> {
    bridge: &'a dyn BridgeStore,
    source: &'a mut Src,
    reporter: Arc<dyn ErrorReporter>,
    cancel: CancellationToken,
    chunk_size: usize,
    summaries: Vec<StageSummary>,
}

impl<'a, Src: Send> StageRun<'a, Src> {
    /// Replace the chunks staged for `step` with its current source rows.
    ///
    /// Query and iteration failures are reported and leave the step with no
    /// chunks; bridge store failures are errors.
    pub async fn step<S>(&mut self, step: &S, param: &S::Param) -> Result<StageSummary>
    where
        S: Step<Source = Src>,
    {
        let name = step.name();
        let mut summary = StageSummary::new(name);

        if self.cancel.is_cancelled() {
            info!(step = %name, "Cancellation requested, not staging step");
            summary.cancelled = true;
            self.summaries.push(summary.clone());
            return Ok(summary);
        }

        let chunk_size = step.chunk_size().unwrap_or(self.chunk_size).max(1);
        self.bridge.clear(name).await?;

        let mut rows = match step.query_rows(&mut *self.source, param).await {
            Ok(rows) => rows,
            Err(e) => {
                let err = e.in_step(name, ErrorLocation::Querying, None);
                self.reporter.on_query_failure(name, &err);
                summary.failure = Some(err.to_string());
                self.summaries.push(summary.clone());
                return Ok(summary);
            }
        };

        let mut chunk = Vec::with_capacity(chunk_size);
        loop {
            if self.cancel.is_cancelled() {
                info!(step = %name, "Cancellation requested, abandoning staged rows");
                summary.cancelled = true;
                break;
            }

            let staged = match rows.next().await {
                None => break,
                Some(row) => row.and_then(|row| stage_row(step, &row)),
            };
            match staged {
                Ok(staged) => {
                    chunk.push(staged);
                    summary.rows += 1;
                }
                Err(e) => {
                    let err = e.in_step(name, ErrorLocation::Looping, None);
                    self.reporter.on_loop_failure(name, &err);
                    summary.failure = Some(err.to_string());
                    break;
                }
            }

            if chunk.len() == chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                self.bridge.save_chunk(name, full).await?;
                summary.chunks += 1;
            }
        }
        drop(rows);

        if summary.is_complete() {
            if !chunk.is_empty() {
                self.bridge.save_chunk(name, chunk).await?;
                summary.chunks += 1;
            }
            info!(
                step = %name,
                rows = summary.rows,
                chunks = summary.chunks,
                "Staged {} rows in {} chunks",
                summary.rows,
                summary.chunks
            );
        } else {
            // Never leave a partial step behind for commit to pick up
            self.bridge.clear(name).await?;
            summary.chunks = 0;
        }

        self.summaries.push(summary.clone());
        Ok(summary)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn source(&mut self) -> &mut Src {
        &mut *self.source
    }
}

fn stage_row<S: Step>(step: &S, row: &S::Row) -> Result<StagedRow> {
    Ok(StagedRow {
        key: serde_json::to_value(step.key(row))?,
        row: serde_json::to_value(row)?,
    })
}

/// A commit pass in progress.
pub struct CommitRun<'a, K: CopyKey, Dst> {
    engine: StepEngine<K>,
    bridge: &'a dyn BridgeStore,
    dest: &'a mut Dst,
    failed_steps: Vec<String>,
}

impl<'a, K: CopyKey, Dst: Send> CommitRun<'a, K, Dst> {
    /// Copy the rows staged for `step` into the destination.
    ///
    /// Chunks are read one at a time. Once every staged row of the step is in
    /// the key map, its chunks are cleared; otherwise they stay for a retry.
    pub async fn step<S>(&mut self, step: &S, param: &S::Param) -> Result<StepOutcome>
    where
        S: Step<Key = K, Dest = Dst>,
    {
        let name = step.name();
        let chunks = self.bridge.chunk_count(name).await?;
        if chunks == 0 && !self.engine.is_cancelled() {
            warn!(step = %name, "Nothing staged for step");
        }

        let bridge = self.bridge;
        let rows: RowStream<'_, S::Row> = stream::iter(0..chunks)
            .then(move |index| async move { bridge.load_chunk(name, index).await })
            .map(|chunk| {
                let rows: Vec<Result<S::Row>> = match chunk {
                    Ok(staged) => staged
                        .into_iter()
                        .map(|s| serde_json::from_value(s.row).map_err(CopyError::from))
                        .collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(rows)
            })
            .flatten()
            .boxed();

        let outcome = self
            .engine
            .process(step, rows, &mut *self.dest, param)
            .await?;

        if outcome.is_clean() {
            if chunks > 0 {
                self.bridge.clear(name).await?;
                debug!(step = %name, chunks, "Cleared committed chunks");
            }
        } else if !outcome.cancelled {
            self.failed_steps.push(name.to_string());
        }
        Ok(outcome)
    }

    /// Mappings recorded so far, including those of earlier runs.
    pub fn key_map(&self) -> &KeyMap<K> {
        self.engine.key_map()
    }

    pub fn is_cancelled(&self) -> bool {
        self.engine.is_cancelled()
    }

    pub fn dest(&mut self) -> &mut Dst {
        &mut *self.dest
    }
}

/// Copy in two phases through a bridge store.
pub struct StagedCopy<K: CopyKey> {
    key_map_store: Arc<dyn KeyMapStore<K>>,
    bridge: Arc<dyn BridgeStore>,
    options: CopyOptions,
}

impl<K: CopyKey> StagedCopy<K> {
    pub fn new(
        key_map_store: Arc<dyn KeyMapStore<K>>,
        bridge: Arc<dyn BridgeStore>,
        options: CopyOptions,
    ) -> Self {
        Self {
            key_map_store,
            bridge,
            options,
        }
    }

    /// Build from configuration, opening the configured key map and bridge
    /// store backends.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let key_map_store = config.key_map.open::<K>().await?;
        let bridge = config.bridge.open()?;
        Ok(Self::new(
            key_map_store,
            bridge,
            CopyOptions::from_config(&config.copy),
        ))
    }

    pub fn bridge(&self) -> &Arc<dyn BridgeStore> {
        &self.bridge
    }

    /// Stage the plan's source rows. Touches no destination.
    pub async fn stage<P>(
        &self,
        plan: &P,
        source: &mut P::Source,
        param: &P::Param,
    ) -> Result<CopyResult<(), StageSummary>>
    where
        P: StagedPlan<Key = K>,
    {
        let clock = RunClock::start("stage");

        let mut run = StageRun {
            bridge: self.bridge.as_ref(),
            source,
            reporter: self.options.reporter.clone(),
            cancel: self.options.cancel.clone(),
            chunk_size: self.options.chunk_size,
            summaries: Vec::new(),
        };
        let output = plan.stage(&mut run, param).await;

        let failed_steps = run
            .summaries
            .iter()
            .filter(|s| s.failure.is_some())
            .map(|s| s.step.clone())
            .collect();
        clock.finish(&self.options.cancel, output, run.summaries, failed_steps)
    }

    /// Commit staged rows to `dest`, resuming from the durable key map.
    pub async fn commit<P>(
        &self,
        plan: &P,
        dest: &mut P::Dest,
        param: &P::Param,
    ) -> Result<CopyResult<P::Output>>
    where
        P: StagedPlan<Key = K>,
    {
        let clock = RunClock::start("commit");

        let mut key_map = KeyMap::new(self.key_map_store.clone());
        key_map.initialize().await?;
        if !key_map.is_durable() {
            warn!(
                "Key map backend '{}' does not persist; commit {} cannot be resumed",
                key_map.backend_type(),
                clock.run_id()
            );
        }

        let mut run = CommitRun {
            engine: self.options.engine(key_map, FailurePolicy::Isolate),
            bridge: self.bridge.as_ref(),
            dest,
            failed_steps: Vec::new(),
        };
        let output = plan.commit(&mut run, param).await;
        let steps = run.engine.take_history();

        clock.finish(&self.options.cancel, output, steps, run.failed_steps)
    }
}
