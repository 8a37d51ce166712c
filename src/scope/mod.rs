//! # Execution Scopes
//!
//! An [`ExecutionScope`] holds the state of one unit of work (typically one
//! inbound request): the batches its collapsers have open and a
//! [`RequestLog`] of what was executed.
//!
//! ## Lifecycle
//!
//! | Step | Call |
//! |------|------|
//! | start of the unit of work | [`ExecutionScope::initialize`] |
//! | lookup on the current thread | [`ExecutionScope::current`] |
//! | attach to another thread | [`ExecutionScope::enter`] (see [`crate::propagation`]) |
//! | end of the unit of work | [`ExecutionScope::shutdown`] |
//!
//! The "current scope" is ambient state held per thread; a thread has at most
//! one active current scope. Code that prefers explicit context can create a
//! scope with [`ExecutionScope::new`] and pass it to
//! [`Collapser::submit_in`](crate::Collapser::submit_in).
//!
//! ```rust
//! use request_collapser::scope::ExecutionScope;
//!
//! let scope = ExecutionScope::initialize().unwrap();
//! assert_eq!(ExecutionScope::current().unwrap().id(), scope.id());
//! scope.shutdown();
//! assert!(ExecutionScope::current().is_none());
//! ```

mod context;
mod log;

pub(crate) use context::{CollapserId, PendingBatch};
pub use context::{ExecutionScope, ScopeGuard, ScopeId};
pub use log::{BatchOutcome, ExecutedBatch, RequestLog};
