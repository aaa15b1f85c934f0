//! # Rowgate
//!
//! > **An asynchronous dispatch facade for transactional tabular stores.**
//!
//! Rowgate lets callers issue CRUD-style operations and multi-operation
//! batches against named tabular resources without blocking the calling
//! thread and without corrupting shared state under concurrent access. It
//! is the engine between "I have a request" and "the store committed":
//! storage itself stays behind a trait the host implements.
//!
//! ## Architecture Overview
//!
//! The crate separates concerns into three layers:
//!
//! 1. **Request Layer** ([`Request`], [`Response`]) - declarative,
//!    immutable descriptions of operations and their kind-tagged results.
//! 2. **Execution Layer** ([`ResourceWorker`], [`BatchApplier`]) -
//!    guarded transactions, batch atomicity, yield points, change marking.
//! 3. **Dispatch Layer** ([`Dispatcher`], [`WorkerRegistry`],
//!    [`ChangeNotifier`]) - worker resolution, sync/async scheduling, and
//!    post-commit observer notification.
//!
//! ## Core Concepts
//!
//! ### One worker per resource
//! The [`WorkerRegistry`] creates exactly one [`ResourceWorker`] per
//! [`ResourceId`], lazily, safely under concurrent first access. Workers
//! hold no store connection; the host's [`StoreResolver`] is consulted per
//! request, so an unavailable store fails the request, never the registry.
//!
//! ### Transactions own everything
//! Every operation, single or batch, runs inside a store transaction.
//! Success commits and flushes change notifications; any error rolls back
//! first and observers never hear about discarded writes. Long batches
//! yield the store lock at marked operations so other contenders make
//! progress, and fail with [`DispatchError::BatchOverflow`] rather than
//! monopolize the lock.
//!
//! ### Concurrency Model
//! - `dispatch_sync` runs the whole transaction on the calling thread.
//! - `dispatch_async` runs it on Tokio's shared blocking pool (grow on
//!   demand, idle threads reclaimed) and reports through the request's
//!   completion callback: on the pool thread, or posted to a designated
//!   [`CallbackContext`] for UI-affinity hosts.
//! - The store's per-resource transaction lock is the single serialization
//!   point; the dispatcher adds no cross-request ordering of its own.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use rowgate::mock::MemoryResolver;
//! use rowgate::{values, Dispatcher, OperationKind, Request, ResourceId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rowgate::DispatchError> {
//!     let dispatcher = Dispatcher::new(Arc::new(MemoryResolver::new()));
//!     let contacts = ResourceId::store("contacts");
//!
//!     // Synchronous: runs on this thread.
//!     let row_id = dispatcher.insert_sync(&contacts, "people", values([("name", "ada")]))?;
//!     assert!(row_id > 0);
//!
//!     // Asynchronous: runs on the blocking pool, awaited here.
//!     let request = Request::builder()
//!         .operation(OperationKind::Query)
//!         .table("people")
//!         .selection("name = ?")
//!         .selection_arg("ada")
//!         .build()?;
//!     let response = dispatcher.dispatch(&contacts, request).await?;
//!     assert_eq!(response.into_query_value().unwrap().len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Testing
//!
//! The [`mock`] module ships an in-memory store with real transaction
//! semantics and instrumentation counters, so dispatch, batching, and
//! notification behavior can be tested deterministically. See the [`mock`]
//! module for the supported query surface.

pub mod batch;
pub mod dispatcher;
pub mod error;
pub mod mock;
pub mod notifier;
pub mod registry;
pub mod request;
pub mod resource;
pub mod response;
pub mod store;
pub mod tracing;
pub mod worker;

// Re-export core types for convenience
pub use batch::{BatchApplier, BatchOperation, MAX_OPERATIONS_PER_YIELD_POINT, SLEEP_AFTER_YIELD};
pub use dispatcher::{AsyncOps, CallbackContext, CallbackRunner, DispatchHandle, Dispatcher};
pub use error::DispatchError;
pub use notifier::{ChangeNotifier, ChangeSet, Observer};
pub use registry::WorkerRegistry;
pub use request::{CompletionCallback, OperationKind, Request, RequestBuilder};
pub use resource::ResourceId;
pub use response::{BatchResult, Response};
pub use store::{
    values, BoxedError, IdentityConverter, QuerySpec, Row, Rows, RowsConverter, StoreResolver,
    StoreTransaction, TabularStore, Value, Values,
};
pub use worker::ResourceWorker;
