//! Single-store, single-transaction copies.

use async_trait::async_trait;
use tracing::{error, warn};

use super::{CopyOptions, CopyResult, RunClock};
use crate::error::{CopyError, Result};
use crate::keymap::{CopyKey, KeyMap};
use crate::report::StepMetrics;
use crate::step::{FailurePolicy, Step, StepEngine};
use crate::store::TransactionalStore;

/// Steps of a local copy, in dependency order.
#[async_trait]
pub trait LocalPlan: Send + Sync {
    type Key: CopyKey;
    type Param: Send + Sync;
    type Store: TransactionalStore;
    type Output: Send;

    /// Run each step through [`LocalRun::step`], parents first.
    async fn execute(
        &self,
        run: &mut LocalRun<'_, Self::Key, Self::Store>,
        param: &Self::Param,
    ) -> Result<Self::Output>;
}

/// A local copy in progress, inside the open transaction.
pub struct LocalRun<'a, K: CopyKey, T> {
    engine: StepEngine<K>,
    store: &'a mut T,
    failed_steps: Vec<String>,
}

impl<'a, K: CopyKey, T: Send> LocalRun<'a, K, T> {
    /// Run `step` against the transaction's store.
    ///
    /// Any step failure is returned as an error, which rolls the whole copy
    /// back once it leaves the plan.
    pub async fn step<S>(&mut self, step: &S, param: &S::Param) -> Result<StepMetrics>
    where
        S: Step<Key = K, Source = T, Dest = T>,
    {
        let outcome = self.engine.execute_shared(step, &mut *self.store, param).await?;
        if outcome.cancelled {
            return Err(CopyError::Cancelled);
        }
        if !outcome.is_clean() {
            self.failed_steps.push(step.name().to_string());
        }
        outcome.into_result()
    }

    /// Mappings recorded so far in this transaction.
    pub fn key_map(&self) -> &KeyMap<K> {
        self.engine.key_map()
    }

    /// The store, for plan-level reads and writes inside the transaction.
    pub fn store(&mut self) -> &mut T {
        &mut *self.store
    }
}

/// All-or-nothing copy within one transactional store.
///
/// The key map lives in memory for the duration of the transaction and is
/// discarded afterwards; there is nothing to resume. Steps run under
/// [`FailurePolicy::Abort`] unless configured otherwise.
#[derive(Debug)]
pub struct LocalCopy {
    options: CopyOptions,
    policy: FailurePolicy,
}

impl Default for LocalCopy {
    fn default() -> Self {
        Self::new(CopyOptions::default())
    }
}

impl LocalCopy {
    pub fn new(options: CopyOptions) -> Self {
        Self {
            options,
            policy: FailurePolicy::Abort,
        }
    }

    /// Tolerate row failures up to the error threshold instead of aborting.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run `plan` inside one transaction on `store`.
    ///
    /// Commits when the plan returns `Ok`; otherwise rolls back and returns
    /// the plan's error.
    pub async fn run<P>(
        &self,
        plan: &P,
        store: &mut P::Store,
        param: &P::Param,
    ) -> Result<CopyResult<P::Output>>
    where
        P: LocalPlan,
    {
        let clock = RunClock::start("local");

        let mut key_map = KeyMap::in_memory();
        key_map.initialize().await?;

        store.begin().await?;

        let mut run = LocalRun {
            engine: self.options.engine(key_map, self.policy),
            store: &mut *store,
            failed_steps: Vec::new(),
        };
        let output = plan.execute(&mut run, param).await;
        let LocalRun {
            mut engine,
            failed_steps,
            ..
        } = run;
        let steps = engine.take_history();

        match output {
            Ok(output) => {
                if let Err(e) = store.commit().await {
                    warn!("Commit failed for run {}, rolling back: {}", clock.run_id(), e);
                    if let Err(rb) = store.rollback().await {
                        error!("Rollback failed for run {}: {}", clock.run_id(), rb);
                    }
                    return Err(e);
                }
                clock.finish(&self.options.cancel, Ok(output), steps, failed_steps)
            }
            Err(e) => {
                warn!("Local copy {} failed, rolling back: {}", clock.run_id(), e);
                if let Err(rb) = store.rollback().await {
                    error!("Rollback failed for run {}: {}", clock.run_id(), rb);
                }
                Err(e)
            }
        }
    }
}
