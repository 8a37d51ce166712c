//! # Scope Propagation
//!
//! Work handed to another thread would otherwise run without the scope of the
//! unit of work that scheduled it, so collapsers called from it could not
//! batch. This module wraps such work together with the scope captured at
//! scheduling time:
//!
//! | Wrapper | Runs on | Scope installed |
//! |---------|---------|-----------------|
//! | [`PropagatedTask`] | any scheduler taking a closure | for the duration of the call |
//! | [`Propagated`] | any executor polling a future | around every poll |
//! | [`ContextPropagator`] | a tokio runtime | both of the above, captured eagerly |
//!
//! If the captured scope has been shut down by the time the work runs, the
//! work does not run and yields [`Error::ScopeNotActive`](crate::Error::ScopeNotActive).
//! Work that lands on a thread where a different scope is still current does
//! not run either and yields [`Error::ScopeAlreadyActive`](crate::Error::ScopeAlreadyActive).
//! A task captured without a scope runs with no current scope.

use crate::scope::{ExecutionScope, ScopeGuard};
use crate::{Error, ErrorContext, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

/// The scope a task scheduled right now would carry.
pub fn capture() -> Option<ExecutionScope> {
    ExecutionScope::current()
}

/// Bundle `task` with `captured`; see [`PropagatedTask::run`].
pub fn propagate<F, T>(task: F, captured: Option<ExecutionScope>) -> PropagatedTask<F>
where
    F: FnOnce() -> T,
{
    PropagatedTask {
        task,
        scope: captured,
    }
}

/// Bundle `fut` with `captured`; see [`Propagated`].
pub fn propagate_future<F>(fut: F, captured: Option<ExecutionScope>) -> Propagated<F>
where
    F: Future,
{
    Propagated {
        inner: Box::pin(fut),
        scope: captured,
    }
}

/// A closure plus the scope it must run under.
pub struct PropagatedTask<F> {
    task: F,
    scope: Option<ExecutionScope>,
}

impl<F, T> PropagatedTask<F>
where
    F: FnOnce() -> T,
{
    /// Install the captured scope on the calling thread, run the task, then
    /// restore whatever the thread had before.
    pub fn run(self) -> Result<T> {
        let PropagatedTask { task, scope } = self;
        let _guard = enter(scope.as_ref())?;
        Ok(task())
    }
}

/// A future that runs every poll under the scope captured when it was created.
///
/// Installing per poll keeps the scope visible even when a work-stealing
/// runtime moves the task between worker threads. Once the captured scope is
/// shut down the next poll resolves to `Err(ScopeNotActive)` and the inner
/// future is not polled again.
#[must_use = "futures do nothing unless polled"]
pub struct Propagated<F> {
    inner: Pin<Box<F>>,
    scope: Option<ExecutionScope>,
}

impl<F: Future> Future for Propagated<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = match enter(this.scope.as_ref()) {
            Ok(guard) => guard,
            Err(e) => return Poll::Ready(Err(e)),
        };
        this.inner.as_mut().poll(cx).map(Ok)
    }
}

fn enter(scope: Option<&ExecutionScope>) -> Result<ScopeGuard> {
    match scope {
        Some(scope) => scope.enter().map_err(|e| {
            match &e {
                Error::ScopeAlreadyActive(current) => warn!(
                    scope = %scope.id(),
                    current = %current,
                    "propagated work landed on a thread with another active scope"
                ),
                _ => warn!(scope = %scope.id(), "propagated work outlived its execution scope"),
            }
            e
        }),
        None => Ok(ScopeGuard::detached()),
    }
}

/// Schedules work on a tokio runtime, carrying the caller's current scope along.
#[derive(Clone)]
pub struct ContextPropagator {
    handle: Handle,
}

impl ContextPropagator {
    /// Propagator for the current tokio runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            Error::configuration_with_context(
                "a context propagator must be created inside a tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("context_propagator"),
            )
        })?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawn `fut` as a task that polls under the caller's scope.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<Result<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(propagate_future(fut, capture()))
    }

    /// Run `f` on the blocking pool under the caller's scope.
    pub fn spawn_blocking<F, T>(&self, f: F) -> JoinHandle<Result<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = propagate(f, capture());
        self.handle.spawn_blocking(move || task.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_task_sees_captured_scope_on_other_thread() {
        let scope = ExecutionScope::new();
        let task = propagate(
            || ExecutionScope::current().map(|s| s.id()),
            Some(scope.clone()),
        );
        let seen = thread::spawn(move || {
            let seen = task.run().unwrap();
            // detached again afterwards
            assert!(ExecutionScope::current().is_none());
            seen
        })
        .join()
        .unwrap();
        assert_eq!(seen, Some(scope.id()));
    }

    #[test]
    fn test_task_after_shutdown_fails() {
        let scope = ExecutionScope::new();
        let task = propagate(|| 42, Some(scope.clone()));
        scope.shutdown();
        match thread::spawn(move || task.run()).join().unwrap() {
            Err(Error::ScopeNotActive(id)) => assert_eq!(id, scope.id()),
            other => panic!("expected ScopeNotActive, got {:?}", other),
        }
    }

    #[test]
    fn test_task_without_scope_runs_detached() {
        thread::spawn(|| {
            let own = ExecutionScope::initialize().unwrap();
            let task = propagate(|| ExecutionScope::current().is_none(), None);
            assert!(task.run().unwrap());
            assert_eq!(ExecutionScope::current().unwrap().id(), own.id());
            own.shutdown();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_capture_is_eager() {
        thread::spawn(|| {
            let scope = ExecutionScope::initialize().unwrap();
            let task = propagate(|| ExecutionScope::current().map(|s| s.id()), capture());
            scope.shutdown();
            // the thread has no scope now, the task still carries the dead one
            assert!(ExecutionScope::current().is_none());
            assert!(matches!(task.run(), Err(Error::ScopeNotActive(_))));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_task_on_thread_with_other_active_scope_fails() {
        let captured = ExecutionScope::new();
        let task = propagate(|| "ran", Some(captured.clone()));
        let fut = propagate_future(async { "ran" }, Some(captured.clone()));

        thread::spawn(move || {
            let resident = ExecutionScope::initialize().unwrap();
            match task.run() {
                Err(Error::ScopeAlreadyActive(id)) => assert_eq!(id, resident.id()),
                other => panic!("expected ScopeAlreadyActive, got {:?}", other),
            }
            assert!(matches!(
                tokio_test::block_on(fut),
                Err(Error::ScopeAlreadyActive(_))
            ));
            // the resident scope is left in place
            assert_eq!(ExecutionScope::current().unwrap().id(), resident.id());
            resident.shutdown();
        })
        .join()
        .unwrap();
        captured.shutdown();
    }

    #[test]
    fn test_reentering_current_scope_is_allowed() {
        thread::spawn(|| {
            let scope = ExecutionScope::initialize().unwrap();
            let task = propagate(|| ExecutionScope::current().map(|s| s.id()), capture());
            assert_eq!(task.run().unwrap(), Some(scope.id()));
            assert_eq!(ExecutionScope::current().unwrap().id(), scope.id());
            scope.shutdown();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_propagated_future_polls_under_scope() {
        let scope = ExecutionScope::new();
        let fut = propagate_future(
            async { ExecutionScope::current().map(|s| s.id()) },
            Some(scope.clone()),
        );
        let seen = tokio_test::block_on(fut).unwrap();
        assert_eq!(seen, Some(scope.id()));
    }

    #[test]
    fn test_propagated_future_fails_once_scope_is_gone() {
        let scope = ExecutionScope::new();
        scope.shutdown();
        let fut = propagate_future(async { 1 }, Some(scope));
        assert!(matches!(
            tokio_test::block_on(fut),
            Err(Error::ScopeNotActive(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_carries_scope() {
        let propagator = ContextPropagator::new().unwrap();
        let scope = ExecutionScope::new();
        let _guard = scope.enter().unwrap();

        let handle = propagator.spawn(async {
            tokio::task::yield_now().await;
            ExecutionScope::current().map(|s| s.id())
        });
        let blocking = propagator.spawn_blocking(|| ExecutionScope::current().map(|s| s.id()));

        assert_eq!(handle.await.unwrap().unwrap(), Some(scope.id()));
        assert_eq!(blocking.await.unwrap().unwrap(), Some(scope.id()));
    }
}
