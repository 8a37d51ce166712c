//! Batch units, open batches and result slots.

use crate::scope::{PendingBatch, ScopeId};
use crate::{Error, Result};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// One pending request and the slot its caller is waiting on.
///
/// Resolving or failing consumes the unit, so a slot is settled at most once.
#[derive(Debug)]
pub(crate) struct BatchUnit<K, V> {
    key: K,
    slot: oneshot::Sender<Result<V>>,
}

impl<K, V> BatchUnit<K, V> {
    pub(crate) fn new(key: K, collapser: Arc<str>) -> (Self, ResponseFuture<V>) {
        let (tx, rx) = oneshot::channel();
        let unit = Self { key, slot: tx };
        (unit, ResponseFuture { rx, collapser })
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    /// Returns false if the caller already dropped its future.
    pub(crate) fn resolve(self, value: V) -> bool {
        self.settle(Ok(value))
    }

    pub(crate) fn fail(self, error: Error) -> bool {
        self.settle(Err(error))
    }

    pub(crate) fn settle(self, result: Result<V>) -> bool {
        self.slot.send(result).is_ok()
    }
}

struct BatchState<K, V> {
    units: Vec<BatchUnit<K, V>>,
    sealed: bool,
}

/// An accumulation window for one collapser inside one scope.
///
/// Appends may race from many threads; [`Batch::seal`] hands the units to
/// exactly one caller and turns every later append away. With a size limit,
/// the append that fills the batch seals it under the same lock, so a batch
/// never holds more than `max_size` units.
pub(crate) struct Batch<K, V> {
    collapser: Arc<str>,
    deadline: Instant,
    max_size: Option<usize>,
    state: Mutex<BatchState<K, V>>,
}

impl<K, V> Batch<K, V> {
    pub(crate) fn new(collapser: Arc<str>, window: Duration, max_size: Option<usize>) -> Self {
        Self {
            collapser,
            deadline: Instant::now() + window,
            max_size,
            state: Mutex::new(BatchState {
                units: Vec::new(),
                sealed: false,
            }),
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Append a unit, or hand it back if the batch is already sealed.
    ///
    /// Returns the sealed units when this append filled the batch.
    pub(crate) fn try_append(
        &self,
        unit: BatchUnit<K, V>,
    ) -> std::result::Result<Option<Vec<BatchUnit<K, V>>>, BatchUnit<K, V>> {
        let mut state = self.state();
        if state.sealed {
            return Err(unit);
        }
        state.units.push(unit);
        if self.max_size.map_or(false, |max| state.units.len() >= max) {
            state.sealed = true;
            return Ok(Some(std::mem::take(&mut state.units)));
        }
        Ok(None)
    }

    /// Close the batch. Only the first caller gets the units.
    pub(crate) fn seal(&self) -> Option<Vec<BatchUnit<K, V>>> {
        let mut state = self.state();
        if state.sealed {
            return None;
        }
        state.sealed = true;
        Some(std::mem::take(&mut state.units))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state().units.len()
    }

    fn state(&self) -> MutexGuard<'_, BatchState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> PendingBatch for Batch<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn abandon(&self, scope: ScopeId) -> usize {
        let units = match self.seal() {
            Some(units) => units,
            None => return 0,
        };
        let count = units.len();
        for unit in units {
            unit.fail(Error::ScopeNotActive(scope));
        }
        count
    }

    fn collapser_name(&self) -> &str {
        &self.collapser
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// The caller's side of one submitted request.
///
/// Resolves with the value demultiplexed for the submitted key, or with the
/// error that settled the unit.
#[derive(Debug)]
#[must_use = "the result of a collapsed request is only observable through its future"]
pub struct ResponseFuture<V> {
    rx: oneshot::Receiver<Result<V>>,
    collapser: Arc<str>,
}

impl<V> ResponseFuture<V> {
    /// Block the current thread until the unit is settled.
    ///
    /// Do not call this from inside an async task; await the future instead.
    pub fn wait(self) -> Result<V> {
        futures::executor::block_on(self)
    }
}

impl<V> Future for ResponseFuture<V> {
    type Output = Result<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|settled| {
            settled.unwrap_or_else(|_| {
                Err(Error::ResultDropped {
                    collapser: this.collapser.to_string(),
                })
            })
        })
    }
}
