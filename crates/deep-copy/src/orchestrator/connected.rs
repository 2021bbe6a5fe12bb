//! Streaming copies between two live stores, resumable through a durable
//! key map.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{CopyOptions, CopyResult, RunClock};
use crate::config::Config;
use crate::error::Result;
use crate::keymap::{CopyKey, KeyMap, KeyMapStore};
use crate::step::{FailurePolicy, Step, StepEngine, StepOutcome};

/// Steps of a connected copy, in dependency order.
#[async_trait]
pub trait ConnectedPlan: Send + Sync {
    type Key: CopyKey;
    type Param: Send + Sync;
    type Source: Send;
    type Dest: Send;
    type Output: Send;

    /// Run each step through [`ConnectedRun::step`], parents first.
    async fn execute(
        &self,
        run: &mut ConnectedRun<'_, Self::Key, Self::Source, Self::Dest>,
        param: &Self::Param,
    ) -> Result<Self::Output>;
}

/// A connected copy in progress.
pub struct ConnectedRun<'a, K: CopyKey, S, D> {
    engine: StepEngine<K>,
    source: &'a mut S,
    dest: &'a mut D,
    failed_steps: Vec<String>,
}

impl<'a, K: CopyKey, Src: Send, Dst: Send> ConnectedRun<'a, K, Src, Dst> {
    /// Run `step` from the source to the destination.
    ///
    /// Step failures are reported and returned in the outcome so later steps
    /// can still run; only a key map failure is an error.
    pub async fn step<S>(&mut self, step: &S, param: &S::Param) -> Result<StepOutcome>
    where
        S: Step<Key = K, Source = Src, Dest = Dst>,
    {
        let outcome = self
            .engine
            .execute(step, &mut *self.source, &mut *self.dest, param)
            .await?;
        if !outcome.is_clean() && !outcome.cancelled {
            self.failed_steps.push(step.name().to_string());
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

    pub fn source(&mut self) -> &mut Src {
        &mut *self.source
    }

    pub fn dest(&mut self) -> &mut Dst {
        &mut *self.dest
    }
}

/// Resumable copy between a source and a destination without a shared
/// transaction.
///
/// Each inserted row's mapping is persisted before the next row starts, so
/// rerunning an interrupted copy with the same parameter skips what was
/// already copied.
pub struct ConnectedCopy<K: CopyKey> {
    key_map_store: Arc<dyn KeyMapStore<K>>,
    options: CopyOptions,
}

impl<K: CopyKey> ConnectedCopy<K> {
    pub fn new(key_map_store: Arc<dyn KeyMapStore<K>>, options: CopyOptions) -> Self {
        Self {
            key_map_store,
            options,
        }
    }

    /// Build from configuration, opening the configured key map backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = config.key_map.open::<K>().await?;
        Ok(Self::new(store, CopyOptions::from_config(&config.copy)))
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Run `plan` from `source` to `dest`.
    pub async fn run<P>(
        &self,
        plan: &P,
        source: &mut P::Source,
        dest: &mut P::Dest,
        param: &P::Param,
    ) -> Result<CopyResult<P::Output>>
    where
        P: ConnectedPlan<Key = K>,
    {
        let clock = RunClock::start("connected");

        let mut key_map = KeyMap::new(self.key_map_store.clone());
        key_map.initialize().await?;
        if !key_map.is_durable() {
            warn!(
                "Key map backend '{}' does not persist; run {} cannot be resumed",
                key_map.backend_type(),
                clock.run_id()
            );
        }

        let mut run = ConnectedRun {
            engine: self.options.engine(key_map, FailurePolicy::Isolate),
            source,
            dest,
            failed_steps: Vec::new(),
        };
        let output = plan.execute(&mut run, param).await;
        let steps = run.engine.take_history();

        clock.finish(&self.options.cancel, output, steps, run.failed_steps)
    }
}
