//! # request-collapser
//!
//! Request collapsing with execution scopes that survive thread handoffs.
//!
//! ## Overview
//!
//! Many callers asking for individual keys at about the same time are served by
//! a single batched downstream call. Batches live inside an
//! [`ExecutionScope`], the state of one unit of work (for example one inbound
//! request). When that unit of work fans out onto other threads, the
//! [`propagation`] module carries its scope along so nested collapsers keep
//! batching under the same scope.
//!
//! ## Key Features
//!
//! - **Window batching**: [`Collapser`] closes a batch after a fixed delay or at a size limit
//! - **Per-key demultiplexing**: each caller gets the result for its key, or a typed
//!   [`Error::MissingResponse`]
//! - **Batch-level failure**: an executor error reaches every caller of the batch
//! - **Scope propagation**: [`ContextPropagator`] installs the scheduling scope on worker threads
//! - **Request log**: every scope records the batches executed on its behalf
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use request_collapser::words::{number_to_words, number_words_mapping};
//! use request_collapser::{Collapser, CollapserConfig, ExecutionScope};
//!
//! #[tokio::main]
//! async fn main() -> request_collapser::Result<()> {
//!     let collapser = Collapser::new(CollapserConfig::new("numbers"), number_words_mapping())?;
//!
//!     let scope = ExecutionScope::initialize()?;
//!     let pending: Vec<_> = (0..100).map(|n| collapser.submit(n)).collect::<Result<_, _>>()?;
//!     for (n, fut) in pending.into_iter().enumerate() {
//!         assert_eq!(fut.await?, number_to_words(n as u64));
//!     }
//!     println!("{}", scope.request_log().executed_batches_as_string());
//!     scope.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`collapser`] | Batching, dispatch and result demultiplexing |
//! | [`scope`] | Execution scope lifecycle and request log |
//! | [`propagation`] | Carrying scopes across threads and tasks |
//! | [`words`] | Reference number-to-words executor |

pub mod collapser;
pub mod propagation;
pub mod scope;
pub mod words;

pub use collapser::{
    BatchExecutor, BatchMapping, Collapser, CollapserConfig, CollapserStats, ResponseFuture,
};
pub use propagation::{propagate, propagate_future, ContextPropagator};
pub use scope::{ExecutionScope, RequestLog, ScopeId};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
