//! Execution scope lifecycle and the per-thread "current scope" slot.

use super::log::{ExecutedBatch, RequestLog};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

thread_local! {
    static CURRENT: RefCell<Option<ExecutionScope>> = const { RefCell::new(None) };
}

/// Opaque identity of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(Uuid);

impl ScopeId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a collapser inside a scope's bucket map.
pub(crate) type CollapserId = u64;

/// An open batch held by a scope, erased over its key and value types.
pub(crate) trait PendingBatch: Send + Sync {
    /// Seal the batch and fail its units with `ScopeNotActive`.
    /// Returns how many units were failed; zero when the batch was already sealed.
    fn abandon(&self, scope: ScopeId) -> usize;

    fn collapser_name(&self) -> &str;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct ScopeState {
    active: bool,
    buckets: HashMap<CollapserId, Arc<dyn PendingBatch>>,
}

struct ScopeInner {
    id: ScopeId,
    state: Mutex<ScopeState>,
    log: Mutex<Vec<ExecutedBatch>>,
}

/// State of one unit of work: open collapser buckets plus the request log.
///
/// Cloning is cheap and yields a handle to the same scope. A scope can be used
/// explicitly (see [`Collapser::submit_in`](crate::Collapser::submit_in)) or
/// installed as the current scope of a thread, one at a time.
#[derive(Clone)]
pub struct ExecutionScope {
    inner: Arc<ScopeInner>,
}

impl ExecutionScope {
    /// Create an active scope without installing it on any thread.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId::new(),
                state: Mutex::new(ScopeState {
                    active: true,
                    buckets: HashMap::new(),
                }),
                log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a scope and make it current on the calling thread.
    ///
    /// Fails with [`Error::ScopeAlreadyActive`] if the thread already has an
    /// active scope. A stale, already shut down scope is replaced.
    pub fn initialize() -> Result<Self> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(existing) = slot.as_ref() {
                if existing.is_active() {
                    return Err(Error::ScopeAlreadyActive(existing.id()));
                }
            }
            let scope = Self::new();
            debug!(scope = %scope.id(), "execution scope initialized");
            *slot = Some(scope.clone());
            Ok(scope)
        })
    }

    /// The scope installed on the calling thread, if any.
    pub fn current() -> Option<Self> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    /// Initialize a scope, run `f` in it, then shut it down (also on unwind).
    pub fn run<F, T>(f: F) -> Result<T>
    where
        F: FnOnce(&ExecutionScope) -> T,
    {
        struct ShutdownOnDrop(ExecutionScope);
        impl Drop for ShutdownOnDrop {
            fn drop(&mut self) {
                self.0.shutdown();
            }
        }

        let guard = ShutdownOnDrop(Self::initialize()?);
        Ok(f(&guard.0))
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// Install this scope as the current scope of the calling thread until the
    /// returned guard is dropped; the previous scope is restored then.
    ///
    /// Re-entering the scope that is already current is allowed. Fails with
    /// [`Error::ScopeAlreadyActive`] if a different, still active scope is
    /// current on the thread.
    pub fn enter(&self) -> Result<ScopeGuard> {
        if !self.is_active() {
            return Err(Error::ScopeNotActive(self.id()));
        }
        if let Some(current) = Self::current() {
            if !current.same_scope(self) && current.is_active() {
                return Err(Error::ScopeAlreadyActive(current.id()));
            }
        }
        Ok(ScopeGuard::install(Some(self.clone())))
    }

    /// Terminate the scope.
    ///
    /// Open batches are sealed and their units failed with
    /// [`Error::ScopeNotActive`]. The scope is detached from the calling thread
    /// and can no longer be entered. Calling this twice is a no-op.
    pub fn shutdown(&self) {
        let buckets = {
            let mut state = self.state();
            if !state.active {
                return;
            }
            state.active = false;
            std::mem::take(&mut state.buckets)
        };

        for batch in buckets.into_values() {
            let failed = batch.abandon(self.id());
            if failed > 0 {
                self.record(ExecutedBatch::abandoned(batch.collapser_name(), failed));
            }
        }

        let _ = CURRENT.try_with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.as_ref().map_or(false, |s| s.same_scope(self)) {
                *slot = None;
            }
        });

        info!(
            scope = %self.id(),
            batches = %self.request_log().executed_batches_as_string(),
            "execution scope shut down"
        );
    }

    /// Snapshot of the batches executed under this scope.
    pub fn request_log(&self) -> RequestLog {
        RequestLog {
            batches: self.log().clone(),
        }
    }

    /// Number of collapsers with an open batch in this scope.
    pub fn pending_batches(&self) -> usize {
        self.state().buckets.len()
    }

    pub(crate) fn same_scope(&self, other: &ExecutionScope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Return the open batch for `collapser`, creating it with `create` if none is open.
    /// The flag is true when the batch was created by this call.
    pub(crate) fn open_batch<B, F>(&self, collapser: CollapserId, create: F) -> Result<(Arc<B>, bool)>
    where
        B: PendingBatch + 'static,
        F: FnOnce() -> Arc<B>,
    {
        let mut state = self.state();
        if !state.active {
            return Err(Error::ScopeNotActive(self.id()));
        }
        if let Some(existing) = state.buckets.get(&collapser) {
            if let Ok(batch) = existing.clone().into_any().downcast::<B>() {
                return Ok((batch, false));
            }
        }
        let batch = create();
        state.buckets.insert(collapser, batch.clone());
        Ok((batch, true))
    }

    /// Drop `batch` from the bucket map if it is still the open batch of `collapser`.
    pub(crate) fn retire_batch<B>(&self, collapser: CollapserId, batch: &Arc<B>)
    where
        B: PendingBatch + 'static,
    {
        let mut state = self.state();
        let is_same = state
            .buckets
            .get(&collapser)
            .map_or(false, |open| {
                Arc::as_ptr(open) as *const () == Arc::as_ptr(batch) as *const ()
            });
        if is_same {
            state.buckets.remove(&collapser);
        }
    }

    pub(crate) fn record(&self, entry: ExecutedBatch) {
        self.log().push(entry);
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, Vec<ExecutedBatch>> {
        self.inner.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExecutionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Restores the thread's previous current scope when dropped.
///
/// Not `Send`: it must be dropped on the thread it was created on.
#[must_use = "the scope is detached as soon as the guard is dropped"]
pub struct ScopeGuard {
    previous: Option<ExecutionScope>,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    /// Clear the current scope of the calling thread until the guard is dropped.
    pub fn detached() -> Self {
        Self::install(None)
    }

    fn install(scope: Option<ExecutionScope>) -> Self {
        let previous = CURRENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), scope));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // The slot may already be gone during thread teardown.
        let _ = CURRENT.try_with(|slot| *slot.borrow_mut() = previous);
    }
}
