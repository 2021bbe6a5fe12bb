//! Shared step execution.
//!
//! Every orchestrator runs its steps through one [`StepEngine`]; they differ
//! only in where rows come from, which [`FailurePolicy`] applies and how the
//! key map is backed.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FailurePolicy, RowContext, RowStream, Step};
use crate::config::DEFAULT_MAX_ERRORS;
use crate::error::{CopyError, ErrorLocation, Result};
use crate::keymap::{CopyKey, KeyMap};
use crate::report::{
    ErrorReporter, MetricsSink, StepMetrics, TracingErrorReporter, TracingMetricsSink,
};

/// Result of one step invocation.
#[derive(Debug)]
pub struct StepOutcome {
    /// Counters, as emitted to the metrics sink.
    pub metrics: StepMetrics,

    /// Step-level failure: the query or loop failed, or a row failed under
    /// [`FailurePolicy::Abort`].
    pub failure: Option<CopyError>,

    /// Stopped at a row boundary because cancellation was requested.
    pub cancelled: bool,

    /// Stopped because row failures reached the error threshold.
    pub halted: bool,
}

impl StepOutcome {
    fn new(step: &str) -> Self {
        Self {
            metrics: StepMetrics::new(step),
            failure: None,
            cancelled: false,
            halted: false,
        }
    }

    /// Every visited row was copied or skipped and the step ran to the end.
    pub fn is_clean(&self) -> bool {
        self.failure.is_none()
            && !self.cancelled
            && !self.halted
            && self.metrics.row_errors() == 0
    }

    /// The counters, or the step-level failure.
    pub fn into_result(self) -> Result<StepMetrics> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.metrics),
        }
    }
}

/// Runs steps against a key map, with one set of sinks, policy and
/// cancellation signal for the whole run.
pub struct StepEngine<K: CopyKey> {
    key_map: KeyMap<K>,
    metrics: Arc<dyn MetricsSink>,
    reporter: Arc<dyn ErrorReporter>,
    cancel: CancellationToken,
    policy: FailurePolicy,
    max_errors: usize,
    history: Vec<StepMetrics>,
}

impl<K: CopyKey> StepEngine<K> {
    /// Create an engine over an initialized key map, logging through `tracing`.
    pub fn new(key_map: KeyMap<K>) -> Self {
        Self {
            key_map,
            metrics: Arc::new(TracingMetricsSink),
            reporter: Arc::new(TracingErrorReporter),
            cancel: CancellationToken::new(),
            policy: FailurePolicy::default(),
            max_errors: DEFAULT_MAX_ERRORS,
            history: Vec::new(),
        }
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default error threshold for steps that do not set their own.
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn key_map(&self) -> &KeyMap<K> {
        &self.key_map
    }

    pub fn into_key_map(self) -> KeyMap<K> {
        self.key_map
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Metrics of every step run so far, in order.
    pub fn history(&self) -> &[StepMetrics] {
        &self.history
    }

    pub fn take_history(&mut self) -> Vec<StepMetrics> {
        std::mem::take(&mut self.history)
    }

    /// Run `step` reading from `source` and writing to `dest`.
    ///
    /// Rows are consumed as the source yields them. Returns `Err` only when
    /// the key map cannot record a mapping; every other failure is
    /// classified, reported and returned in the [`StepOutcome`].
    pub async fn execute<S>(
        &mut self,
        step: &S,
        source: &mut S::Source,
        dest: &mut S::Dest,
        param: &S::Param,
    ) -> Result<StepOutcome>
    where
        S: Step<Key = K>,
    {
        if let Some(outcome) = self.cancelled_at_entry(step.name()) {
            return Ok(outcome);
        }

        let started = Instant::now();
        let rows = match step.query_rows(source, param).await {
            Ok(rows) => rows,
            Err(e) => return Ok(self.query_failed(step.name(), e, started).await),
        };
        self.drive(step, rows, dest, param, started).await
    }

    /// Run `step` with one handle serving as both source and destination.
    ///
    /// The query result is buffered before the first insert, since the handle
    /// cannot be read and written at the same time.
    pub async fn execute_shared<S, T>(
        &mut self,
        step: &S,
        store: &mut T,
        param: &S::Param,
    ) -> Result<StepOutcome>
    where
        S: Step<Key = K, Source = T, Dest = T>,
        T: Send,
    {
        if let Some(outcome) = self.cancelled_at_entry(step.name()) {
            return Ok(outcome);
        }

        let started = Instant::now();
        let buffered = match step.query_rows(store, param).await {
            Ok(mut rows) => {
                let mut buffered = Vec::new();
                while let Some(item) = rows.next().await {
                    let failed = item.is_err();
                    buffered.push(item);
                    if failed {
                        break;
                    }
                }
                buffered
            }
            Err(e) => return Ok(self.query_failed(step.name(), e, started).await),
        };

        self.drive(step, stream::iter(buffered).boxed(), store, param, started)
            .await
    }

    /// Run `step` over rows obtained elsewhere, such as a bridge store.
    pub async fn process<S>(
        &mut self,
        step: &S,
        rows: RowStream<'_, S::Row>,
        dest: &mut S::Dest,
        param: &S::Param,
    ) -> Result<StepOutcome>
    where
        S: Step<Key = K>,
    {
        if let Some(outcome) = self.cancelled_at_entry(step.name()) {
            return Ok(outcome);
        }
        self.drive(step, rows, dest, param, Instant::now()).await
    }

    fn cancelled_at_entry(&self, name: &str) -> Option<StepOutcome> {
        if !self.cancel.is_cancelled() {
            debug!(step = %name, "Starting step");
            return None;
        }
        info!(step = %name, "Cancellation requested, not starting step");
        let mut outcome = StepOutcome::new(name);
        outcome.cancelled = true;
        Some(outcome)
    }

    async fn query_failed(&mut self, name: &str, e: CopyError, started: Instant) -> StepOutcome {
        let err = e.in_step(name, ErrorLocation::Querying, None);
        self.reporter.on_query_failure(name, &err);

        let mut outcome = StepOutcome::new(name);
        outcome.failure = Some(err);
        outcome.metrics.duration = started.elapsed();
        self.emit(&outcome.metrics).await;
        outcome
    }

    async fn drive<S>(
        &mut self,
        step: &S,
        mut rows: RowStream<'_, S::Row>,
        dest: &mut S::Dest,
        param: &S::Param,
        started: Instant,
    ) -> Result<StepOutcome>
    where
        S: Step<Key = K>,
    {
        let name = step.name();
        let mut outcome = StepOutcome::new(name);

        let looped = self
            .row_loop(step, &mut rows, dest, param, &mut outcome)
            .await;
        drop(rows);

        if looped.is_ok() && !outcome.cancelled {
            if let Err(e) = step.on_step_completed(dest, param).await {
                let err = e.in_step(name, ErrorLocation::Looping, None);
                self.reporter.on_loop_failure(name, &err);
                outcome.failure.get_or_insert(err);
            }
        }

        outcome.metrics.duration = started.elapsed();
        self.emit(&outcome.metrics).await;

        looped?;
        Ok(outcome)
    }

    async fn row_loop<S>(
        &mut self,
        step: &S,
        rows: &mut RowStream<'_, S::Row>,
        dest: &mut S::Dest,
        param: &S::Param,
        outcome: &mut StepOutcome,
    ) -> Result<()>
    where
        S: Step<Key = K>,
    {
        let name = step.name();
        let max_errors = step.max_errors().unwrap_or(self.max_errors);

        loop {
            if self.cancel.is_cancelled() {
                info!(step = %name, "Cancellation requested, stopping at row boundary");
                outcome.cancelled = true;
                return Ok(());
            }

            let row = match rows.next().await {
                None => return Ok(()),
                Some(Ok(row)) => row,
                Some(Err(e)) => {
                    let err = e.in_step(name, ErrorLocation::Looping, None);
                    self.reporter.on_loop_failure(name, &err);
                    outcome.failure = Some(err);
                    return Ok(());
                }
            };

            let key = step.key(&row);
            if self.key_map.contains_key(name, &key) {
                debug!(step = %name, source_key = %key, "Already copied, skipping");
                outcome.metrics.skipped_rows += 1;
                continue;
            }

            let ctx = RowContext::new(&self.key_map, param, name);
            let new_row = match step.create_row(&row, &ctx) {
                Ok(new_row) => new_row,
                Err(e) => {
                    outcome.metrics.create_errors += 1;
                    let err = e.in_step(name, ErrorLocation::Creating, Some(key.to_string()));
                    self.reporter.on_create_failure(name, &err, &to_json(&row));
                    if self.stop_after_row_failure(name, err, outcome, max_errors) {
                        return Ok(());
                    }
                    continue;
                }
            };

            match step.insert_row(dest, &new_row).await {
                Ok(dest_key) => {
                    outcome.metrics.success_rows += 1;
                    if let Err(e) = self.key_map.add(name, key.clone(), dest_key).await {
                        error!(
                            step = %name,
                            source_key = %key,
                            "Row was inserted but its key mapping could not be recorded: {}",
                            e
                        );
                        return Err(e);
                    }
                }
                Err(e) => {
                    outcome.metrics.insert_errors += 1;
                    let err = e.in_step(name, ErrorLocation::Inserting, Some(key.to_string()));
                    self.reporter
                        .on_insert_failure(name, &err, &to_json(&row), &to_json(&new_row));
                    if self.stop_after_row_failure(name, err, outcome, max_errors) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Apply the failure policy to a reported row failure. Returns true when
    /// the step must stop.
    fn stop_after_row_failure(
        &self,
        name: &str,
        err: CopyError,
        outcome: &mut StepOutcome,
        max_errors: usize,
    ) -> bool {
        match self.policy {
            FailurePolicy::Abort => {
                outcome.failure = Some(err);
                true
            }
            FailurePolicy::Isolate => {
                let errors = outcome.metrics.row_errors();
                if errors >= max_errors {
                    warn!(
                        step = %name,
                        errors,
                        max_errors,
                        "Error threshold reached, skipping the rest of the step"
                    );
                    outcome.halted = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn emit(&mut self, metrics: &StepMetrics) {
        if let Err(e) = self.metrics.log(metrics).await {
            warn!(step = %metrics.step, "Metrics sink failed: {}", e);
        }
        self.history.push(metrics.clone());
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::{KeyMapEntry, KeyMapStore};
    use crate::report::{MemoryErrorReporter, MemoryMetricsSink};
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Item {
        id: i64,
        parent: Option<i64>,
        name: String,
    }

    #[derive(Default)]
    struct Source {
        items: Vec<Item>,
        fail_query: bool,
        fail_after: Option<usize>,
    }

    impl Source {
        fn with_items(n: i64) -> Self {
            Self {
                items: (1..=n)
                    .map(|id| Item {
                        id,
                        parent: None,
                        name: format!("item-{}", id),
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[derive(Default)]
    struct Dest {
        rows: Vec<(i64, Item)>,
        reject: Vec<String>,
        reject_all: bool,
        cancel_after: Option<(usize, CancellationToken)>,
        attempts: usize,
        completed: usize,
    }

    struct CopyItems {
        name: &'static str,
        parent_step: Option<&'static str>,
        max_errors: Option<usize>,
    }

    impl CopyItems {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                parent_step: None,
                max_errors: None,
            }
        }
    }

    #[async_trait]
    impl Step for CopyItems {
        type Key = i64;
        type Param = ();
        type Source = Source;
        type Dest = Dest;
        type Row = Item;
        type NewRow = Item;

        fn name(&self) -> &str {
            self.name
        }

        fn max_errors(&self) -> Option<usize> {
            self.max_errors
        }

        async fn query_rows<'a>(
            &'a self,
            source: &'a mut Source,
            _param: &'a (),
        ) -> Result<RowStream<'a, Item>> {
            if source.fail_query {
                return Err(CopyError::row("source offline"));
            }
            let mut items: Vec<Result<Item>> = source.items.iter().cloned().map(Ok).collect();
            if let Some(n) = source.fail_after {
                items.truncate(n);
                items.push(Err(CopyError::row("cursor lost")));
            }
            Ok(stream::iter(items).boxed())
        }

        fn key(&self, row: &Item) -> i64 {
            row.id
        }

        fn create_row(&self, row: &Item, ctx: &RowContext<'_, i64, ()>) -> Result<Item> {
            let parent = match (self.parent_step, row.parent) {
                (Some(step), Some(p)) => Some(ctx.resolve(step, &p)?),
                _ => row.parent,
            };
            Ok(Item {
                id: 0,
                parent,
                name: row.name.clone(),
            })
        }

        async fn insert_row(&self, dest: &mut Dest, row: &Item) -> Result<i64> {
            dest.attempts += 1;
            if dest.reject_all || dest.reject.contains(&row.name) {
                return Err(CopyError::row(format!("rejected {}", row.name)));
            }
            let id = 1000 + dest.rows.len() as i64;
            dest.rows.push((id, row.clone()));
            if let Some((n, token)) = &dest.cancel_after {
                if dest.rows.len() >= *n {
                    token.cancel();
                }
            }
            Ok(id)
        }

        async fn on_step_completed(&self, dest: &mut Dest, _param: &()) -> Result<()> {
            dest.completed += 1;
            Ok(())
        }
    }

    struct Harness {
        engine: StepEngine<i64>,
        metrics: Arc<MemoryMetricsSink>,
        reporter: Arc<MemoryErrorReporter>,
    }

    fn harness(key_map: KeyMap<i64>) -> Harness {
        let metrics = Arc::new(MemoryMetricsSink::new());
        let reporter = Arc::new(MemoryErrorReporter::new());
        let engine = StepEngine::new(key_map)
            .with_metrics_sink(metrics.clone())
            .with_error_reporter(reporter.clone());
        Harness {
            engine,
            metrics,
            reporter,
        }
    }

    #[tokio::test]
    async fn test_copies_rows_and_records_mappings() {
        let mut h = harness(KeyMap::in_memory());
        let mut source = Source::with_items(5);
        let mut dest = Dest::default();

        let outcome = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap();

        assert!(outcome.is_clean());
        assert_eq!(outcome.metrics.success_rows, 5);
        assert_eq!(dest.rows.len(), 5);
        assert_eq!(dest.completed, 1);
        assert_eq!(h.engine.key_map().resolve("Items", &3).unwrap(), 1002);
        assert_eq!(h.metrics.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_skips_every_row() {
        let mut h = harness(KeyMap::in_memory());
        let step = CopyItems::new("Items");
        let mut source = Source::with_items(4);
        let mut dest = Dest::default();

        h.engine.execute(&step, &mut source, &mut dest, &()).await.unwrap();
        let again = h.engine.execute(&step, &mut source, &mut dest, &()).await.unwrap();

        assert_eq!(again.metrics.skipped_rows, 4);
        assert_eq!(again.metrics.success_rows, 0);
        assert_eq!(dest.rows.len(), 4);
        assert_eq!(h.engine.key_map().step_len("Items"), 4);
    }

    #[tokio::test]
    async fn test_insert_failure_is_isolated_to_its_row() {
        let mut h = harness(KeyMap::in_memory());
        let mut source = Source::with_items(6);
        let mut dest = Dest {
            reject: vec!["item-4".into()],
            ..Default::default()
        };

        let outcome = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap();

        assert!(outcome.failure.is_none());
        assert_eq!(outcome.metrics.success_rows, 5);
        assert_eq!(outcome.metrics.insert_errors, 1);
        assert!(!h.engine.key_map().contains_key("Items", &4));
        assert_eq!(h.engine.key_map().step_len("Items"), 5);

        let failures = h.reporter.snapshot();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].location, ErrorLocation::Inserting);
        assert_eq!(failures[0].key.as_deref(), Some("4"));
        assert_eq!(failures[0].new_row.as_ref().unwrap()["name"], "item-4");
    }

    #[tokio::test]
    async fn test_error_threshold_stops_step() {
        let mut h = harness(KeyMap::in_memory());
        let step = CopyItems {
            max_errors: Some(3),
            ..CopyItems::new("Items")
        };
        let mut source = Source::with_items(10);
        let mut dest = Dest {
            reject_all: true,
            ..Default::default()
        };

        let outcome = h.engine.execute(&step, &mut source, &mut dest, &()).await.unwrap();

        assert!(outcome.halted);
        assert_eq!(outcome.metrics.insert_errors, 3);
        assert_eq!(outcome.metrics.success_rows, 0);
        assert_eq!(outcome.metrics.skipped_rows, 0);
        assert_eq!(h.reporter.snapshot().len(), 3);

        // The other 7 rows were never tried, but the step still completed
        assert_eq!(dest.attempts, 3);
        assert_eq!(dest.completed, 1);
    }

    #[tokio::test]
    async fn test_engine_default_threshold() {
        let mut h = harness(KeyMap::in_memory());
        h.engine = h.engine.with_max_errors(2);
        let mut source = Source::with_items(10);
        let mut dest = Dest {
            reject_all: true,
            ..Default::default()
        };

        let outcome = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap();
        assert_eq!(outcome.metrics.insert_errors, 2);
    }

    #[tokio::test]
    async fn test_unresolved_parent_is_a_creating_failure() {
        let mut h = harness(KeyMap::in_memory());
        let step = CopyItems {
            parent_step: Some("Orders"),
            ..CopyItems::new("LineItems")
        };
        let mut source = Source {
            items: vec![Item {
                id: 1,
                parent: Some(77),
                name: "orphan".into(),
            }],
            ..Default::default()
        };
        let mut dest = Dest::default();

        let outcome = h.engine.execute(&step, &mut source, &mut dest, &()).await.unwrap();

        assert_eq!(outcome.metrics.create_errors, 1);
        assert!(dest.rows.is_empty());
        let failures = h.reporter.snapshot();
        assert_eq!(failures[0].location, ErrorLocation::Creating);
        assert_eq!(
            failures[0].message,
            "Key map has no entry for step Orders, source key 77"
        );
    }

    #[tokio::test]
    async fn test_parent_key_is_resolved() {
        let mut key_map = KeyMap::in_memory();
        key_map.add("Orders", 77, 5077).await.unwrap();
        let mut h = harness(key_map);
        let step = CopyItems {
            parent_step: Some("Orders"),
            ..CopyItems::new("LineItems")
        };
        let mut source = Source {
            items: vec![Item {
                id: 1,
                parent: Some(77),
                name: "child".into(),
            }],
            ..Default::default()
        };
        let mut dest = Dest::default();

        h.engine.execute(&step, &mut source, &mut dest, &()).await.unwrap();
        assert_eq!(dest.rows[0].1.parent, Some(5077));
    }

    #[tokio::test]
    async fn test_query_failure_emits_zero_metrics() {
        let mut h = harness(KeyMap::in_memory());
        let mut source = Source {
            fail_query: true,
            ..Source::with_items(3)
        };
        let mut dest = Dest::default();

        let outcome = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap();

        let failure = outcome.failure.as_ref().unwrap();
        assert_eq!(failure.location(), Some(ErrorLocation::Querying));
        assert_eq!(dest.completed, 0);

        let emitted = h.metrics.snapshot();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].rows_seen(), 0);
    }

    #[tokio::test]
    async fn test_stream_failure_is_a_looping_failure() {
        let mut h = harness(KeyMap::in_memory());
        let mut source = Source {
            fail_after: Some(2),
            ..Source::with_items(5)
        };
        let mut dest = Dest::default();

        let outcome = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap();

        assert_eq!(
            outcome.failure.as_ref().and_then(CopyError::location),
            Some(ErrorLocation::Looping)
        );
        assert_eq!(outcome.metrics.success_rows, 2);
        assert_eq!(dest.completed, 1);
        assert_eq!(h.reporter.snapshot()[0].location, ErrorLocation::Looping);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_on_first_row_error() {
        let mut h = harness(KeyMap::in_memory());
        h.engine = h.engine.with_policy(FailurePolicy::Abort);
        let mut source = Source::with_items(5);
        let mut dest = Dest {
            reject: vec!["item-2".into()],
            ..Default::default()
        };

        let outcome = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap();

        assert_eq!(outcome.metrics.success_rows, 1);
        assert_eq!(outcome.metrics.insert_errors, 1);
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.location(), Some(ErrorLocation::Inserting));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_has_no_side_effects() {
        let token = CancellationToken::new();
        token.cancel();
        let mut h = harness(KeyMap::in_memory());
        h.engine = h.engine.with_cancellation(token);
        let mut source = Source::with_items(3);
        let mut dest = Dest::default();

        let outcome = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert!(dest.rows.is_empty());
        assert_eq!(dest.completed, 0);
        assert!(h.metrics.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_at_row_boundary_and_resumes() {
        let token = CancellationToken::new();
        let mut h = harness(KeyMap::in_memory());
        h.engine = h.engine.with_cancellation(token.clone());
        let step = CopyItems::new("Items");
        let mut source = Source::with_items(6);
        let mut dest = Dest {
            cancel_after: Some((2, token)),
            ..Default::default()
        };

        let first = h.engine.execute(&step, &mut source, &mut dest, &()).await.unwrap();
        assert!(first.cancelled);
        assert_eq!(first.metrics.success_rows, 2);
        assert_eq!(dest.completed, 0);

        let key_map = h.engine.into_key_map();
        let mut resumed = StepEngine::new(key_map);
        dest.cancel_after = None;
        let second = resumed.execute(&step, &mut source, &mut dest, &()).await.unwrap();

        assert_eq!(second.metrics.skipped_rows, 2);
        assert_eq!(second.metrics.success_rows, 4);
        assert_eq!(dest.rows.len(), 6);
    }

    struct BrokenStore;

    #[async_trait]
    impl KeyMapStore<i64> for BrokenStore {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn load(&self) -> Result<Vec<KeyMapEntry<i64>>> {
            Ok(Vec::new())
        }

        async fn append(&self, _entry: &KeyMapEntry<i64>) -> Result<()> {
            Err(CopyError::store("disk full"))
        }

        fn backend_type(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_key_map_failure_is_fatal() {
        let mut h = harness(KeyMap::new(Arc::new(BrokenStore)));
        let mut source = Source::with_items(3);
        let mut dest = Dest::default();

        let err = h
            .engine
            .execute(&CopyItems::new("Items"), &mut source, &mut dest, &())
            .await
            .unwrap_err();

        assert!(matches!(err, CopyError::Store(_)));
        assert_eq!(dest.rows.len(), 1);
        assert_eq!(dest.completed, 0);
        assert_eq!(h.metrics.snapshot().len(), 1);
    }
}
