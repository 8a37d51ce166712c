//! Collapser: accumulate keyed requests per scope, dispatch them as one batch,
//! and route each result back to the callers that asked for its key.

use super::batch::{Batch, BatchUnit, ResponseFuture};
use super::config::CollapserConfig;
use super::executor::BatchMapping;
use crate::scope::{BatchOutcome, CollapserId, ExecutedBatch, ExecutionScope};
use crate::{Error, ErrorContext, Result};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

static NEXT_COLLAPSER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapserStats {
    pub submitted: u64,
    /// Executor calls, one per dispatched batch.
    pub invocations: u64,
    pub resolved: u64,
    pub missing_responses: u64,
    pub failed_units: u64,
}

impl CollapserStats {
    pub fn average_batch_size(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            let units = self.resolved + self.missing_responses + self.failed_units;
            units as f64 / self.invocations as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    submitted: AtomicU64,
    invocations: AtomicU64,
    resolved: AtomicU64,
    missing_responses: AtomicU64,
    failed_units: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CollapserStats {
        CollapserStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            missing_responses: self.missing_responses.load(Ordering::Relaxed),
            failed_units: self.failed_units.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.submitted,
            &self.invocations,
            &self.resolved,
            &self.missing_responses,
            &self.failed_units,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

struct Inner<K, R, V> {
    id: CollapserId,
    name: Arc<str>,
    config: CollapserConfig,
    mapping: BatchMapping<K, R, V>,
    handle: Handle,
    stats: AtomicStats,
}

/// Collapses keyed requests issued within one window into a single executor call.
///
/// `K` is the request key, `R` the executor's per-key result and `V` what a
/// caller receives. Batches are kept per [`ExecutionScope`], so requests from
/// different units of work never share a batch. Cloning yields a handle to the
/// same collapser.
pub struct Collapser<K, R, V> {
    inner: Arc<Inner<K, R, V>>,
}

impl<K, R, V> Clone for Collapser<K, R, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, R, V> Collapser<K, R, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a collapser whose windows run on the current tokio runtime.
    pub fn new(config: CollapserConfig, mapping: BatchMapping<K, R, V>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            Error::configuration_with_context(
                "a collapser must be created inside a tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("collapser"),
            )
        })?;
        Self::with_handle(config, mapping, handle)
    }

    pub fn with_handle(
        config: CollapserConfig,
        mapping: BatchMapping<K, R, V>,
        handle: Handle,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                id: NEXT_COLLAPSER_ID.fetch_add(1, Ordering::Relaxed),
                name: Arc::from(config.name.as_str()),
                config,
                mapping,
                handle,
                stats: AtomicStats::default(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submit `key` under the calling thread's current scope.
    ///
    /// Fails immediately with [`Error::NoActiveScope`] when the thread has no
    /// scope, or [`Error::ScopeNotActive`] when its scope was shut down.
    pub fn submit(&self, key: K) -> Result<ResponseFuture<V>> {
        let scope = ExecutionScope::current().ok_or(Error::NoActiveScope)?;
        self.submit_in(&scope, key)
    }

    /// Submit `key` into the open batch of an explicitly passed scope.
    pub fn submit_in(&self, scope: &ExecutionScope, key: K) -> Result<ResponseFuture<V>> {
        let inner = &self.inner;
        let (mut unit, response) = BatchUnit::new(key, Arc::clone(&inner.name));

        loop {
            let (batch, created) = scope.open_batch(inner.id, || {
                Arc::new(Batch::new(
                    Arc::clone(&inner.name),
                    inner.config.window,
                    inner.config.max_batch_size,
                ))
            })?;
            if created {
                trace!(collapser = %inner.name, scope = %scope.id(), "opened batch window");
                self.schedule_window(scope.clone(), Arc::clone(&batch));
            }

            match batch.try_append(unit) {
                Ok(filled) => {
                    inner.stats.submitted.fetch_add(1, Ordering::Relaxed);
                    if let Some(units) = filled {
                        scope.retire_batch(inner.id, &batch);
                        debug!(
                            collapser = %inner.name,
                            size = units.len(),
                            "batch full, closing window early"
                        );
                        inner
                            .handle
                            .spawn(Arc::clone(inner).dispatch(scope.clone(), units));
                    }
                    return Ok(response);
                }
                Err(rejected) => {
                    // Sealed between lookup and append; open a fresh window.
                    scope.retire_batch(inner.id, &batch);
                    unit = rejected;
                }
            }
        }
    }

    /// Executor calls made so far.
    pub fn invocation_count(&self) -> u64 {
        self.inner.stats.invocations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CollapserStats {
        self.inner.stats.to_stats()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    fn schedule_window(&self, scope: ExecutionScope, batch: Arc<Batch<K, V>>) {
        let inner = Arc::clone(&self.inner);
        let deadline = tokio::time::Instant::from_std(batch.deadline());
        self.inner.handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(units) = batch.seal() {
                scope.retire_batch(inner.id, &batch);
                inner.dispatch(scope, units).await;
            }
        });
    }
}

impl<K, R, V> Inner<K, R, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
    V: Clone + Send + 'static,
{
    async fn dispatch(self: Arc<Self>, scope: ExecutionScope, units: Vec<BatchUnit<K, V>>) {
        if units.is_empty() {
            return;
        }
        let started = Instant::now();
        let batch_size = units.len();
        let keys = distinct_keys(&units);
        let distinct = keys.len();
        let invocation = self.stats.invocations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            collapser = %self.name,
            scope = %scope.id(),
            units = batch_size,
            keys = distinct,
            invocation,
            "dispatching batch"
        );

        let executed = AssertUnwindSafe(self.mapping.executor.execute(keys))
            .catch_unwind()
            .await;
        let (outcome, settlements) = match executed {
            Ok(Ok(results)) => self.demultiplex(units, results),
            Ok(Err(cause)) => self.fail_all(units, cause),
            Err(panic) => self.fail_all(
                units,
                anyhow::anyhow!("batch executor panicked: {}", panic_message(panic.as_ref())),
            ),
        };

        // Log before settling so a caller that sees its result also sees the entry.
        if self.config.request_log_enabled {
            scope.record(ExecutedBatch::new(
                &*self.name,
                batch_size,
                distinct,
                outcome,
                started.elapsed(),
            ));
        }
        for (unit, result) in settlements {
            unit.settle(result);
        }
    }

    fn demultiplex(
        &self,
        units: Vec<BatchUnit<K, V>>,
        results: Vec<R>,
    ) -> (BatchOutcome, Settlements<K, V>) {
        let mut by_key: HashMap<K, V> = HashMap::with_capacity(results.len());
        for result in &results {
            by_key
                .entry((self.mapping.result_key)(result))
                .or_insert_with(|| (self.mapping.to_response)(result));
        }

        let (mut resolved, mut missing) = (0usize, 0usize);
        let settlements: Settlements<K, V> = units
            .into_iter()
            .map(|unit| match by_key.get(unit.key()).cloned() {
                Some(value) => {
                    trace!(collapser = %self.name, key = ?unit.key(), "resolving unit");
                    resolved += 1;
                    (unit, Ok(value))
                }
                None => {
                    missing += 1;
                    let err = Error::MissingResponse {
                        collapser: self.name.to_string(),
                        key: format!("{:?}", unit.key()),
                    };
                    (unit, Err(err))
                }
            })
            .collect();

        if missing > 0 {
            debug!(collapser = %self.name, missing, "executor returned no value for some keys");
        }
        self.stats
            .resolved
            .fetch_add(resolved as u64, Ordering::Relaxed);
        self.stats
            .missing_responses
            .fetch_add(missing as u64, Ordering::Relaxed);
        (BatchOutcome::Success { resolved, missing }, settlements)
    }

    fn fail_all(
        &self,
        units: Vec<BatchUnit<K, V>>,
        cause: anyhow::Error,
    ) -> (BatchOutcome, Settlements<K, V>) {
        let cause = Arc::new(cause);
        warn!(
            collapser = %self.name,
            units = units.len(),
            error = %cause,
            "batch execution failed"
        );
        self.stats
            .failed_units
            .fetch_add(units.len() as u64, Ordering::Relaxed);
        let outcome = BatchOutcome::Failed {
            message: cause.to_string(),
        };
        let settlements = units
            .into_iter()
            .map(|unit| {
                let err = Error::batch_failed(&*self.name, Arc::clone(&cause));
                (unit, Err(err))
            })
            .collect();
        (outcome, settlements)
    }
}

type Settlements<K, V> = Vec<(BatchUnit<K, V>, Result<V>)>;

/// Keys in arrival order with duplicates removed.
fn distinct_keys<K, V>(units: &[BatchUnit<K, V>]) -> Vec<K>
where
    K: Eq + Hash + Clone,
{
    let mut seen = HashSet::with_capacity(units.len());
    units
        .iter()
        .filter(|unit| seen.insert(unit.key().clone()))
        .map(|unit| unit.key().clone())
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
