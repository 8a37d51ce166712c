//! # Request Collapsing Module
//!
//! Merges many individually issued requests that arrive close together into
//! a small number of batched downstream calls.
//!
//! ## Overview
//!
//! 1. [`Collapser::submit`] appends the request to the open batch of the
//!    current [`ExecutionScope`](crate::scope::ExecutionScope), opening one
//!    (and starting its window timer) if needed, and returns a [`ResponseFuture`].
//! 2. The window closes when its delay elapses or when it reaches
//!    `max_batch_size`, whichever comes first. Sealing is exclusive: exactly
//!    one closer gets the units, later submissions open a new window.
//! 3. The [`BatchExecutor`] receives the distinct keys of the batch.
//! 4. Results are matched back to units by key. Units whose key got no result
//!    fail with [`Error::MissingResponse`](crate::Error::MissingResponse); an
//!    executor failure fails every unit with the same
//!    [`Error::BatchExecutionFailed`](crate::Error::BatchExecutionFailed).
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Collapser`] | Accepts keyed requests and runs batch windows |
//! | [`CollapserConfig`] | Window delay, size trigger, request log switch |
//! | [`BatchExecutor`] | The downstream batch call |
//! | [`BatchMapping`] | Executor plus result-key and response selectors |
//! | [`ResponseFuture`] | The caller's single-assignment result slot |
//!
//! ## Example
//!
//! ```rust
//! use request_collapser::collapser::{BatchMapping, Collapser, CollapserConfig, FnExecutor};
//! use request_collapser::scope::ExecutionScope;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> request_collapser::Result<()> {
//! let mapping = BatchMapping::pairs(FnExecutor::new(|keys: Vec<u32>| -> anyhow::Result<Vec<(u32, u32)>> {
//!     Ok(keys.into_iter().map(|k| (k, k * k)).collect())
//! }));
//! let squares = Collapser::new(CollapserConfig::new("squares"), mapping)?;
//!
//! let scope = ExecutionScope::initialize()?;
//! let a = squares.submit(3)?;
//! let b = squares.submit(4)?;
//! assert_eq!(a.await?, 9);
//! assert_eq!(b.await?, 16);
//! assert_eq!(squares.invocation_count(), 1);
//! scope.shutdown();
//! # Ok(())
//! # }
//! ```

mod batch;
mod config;
mod core;
mod executor;

pub use self::batch::ResponseFuture;
pub use self::config::CollapserConfig;
pub use self::core::{Collapser, CollapserStats};
pub use self::executor::{BatchExecutor, BatchMapping, FnExecutor};
