//! # Dispatcher
//!
//! The caller-facing entry point. A [`Dispatcher`] resolves the target
//! worker through its [`WorkerRegistry`] and executes the request either on
//! the calling thread ([`dispatch_sync`](Dispatcher::dispatch_sync)) or on
//! Tokio's shared blocking pool
//! ([`dispatch_async`](Dispatcher::dispatch_async)), a grow-on-demand pool
//! whose idle threads are reclaimed, so a burst of requests never blocks the
//! caller and never pins threads permanently.
//!
//! Async completions are delivered through the request's completion
//! callback, either on the pool thread that ran the transaction or posted to
//! a designated [`CallbackContext`] when the request asked for it (the
//! equivalent of marshaling results back onto a UI-affinity thread).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::batch::{BatchApplier, BatchOperation};
use crate::error::DispatchError;
use crate::notifier::{ChangeNotifier, Observer};
use crate::request::{CompletionCallback, OperationKind, Request, RequestBuilder};
use crate::resource::ResourceId;
use crate::response::{BatchResult, Response};
use crate::registry::WorkerRegistry;
use crate::store::{StoreResolver, Value, Values};

type Job = Box<dyn FnOnce() + Send>;

/// A designated execution context for completion callbacks.
///
/// The context is just the sending half of a queue; the paired
/// [`CallbackRunner`] drains it on whatever task or thread the host
/// designates. Cloning is cheap.
#[derive(Clone)]
pub struct CallbackContext {
    sender: mpsc::UnboundedSender<Job>,
}

impl CallbackContext {
    /// Creates a context and the runner that drains it.
    pub fn channel() -> (CallbackContext, CallbackRunner) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (CallbackContext { sender }, CallbackRunner { receiver })
    }

    fn post(&self, job: Job) -> Result<(), ()> {
        self.sender.send(job).map_err(|_| ())
    }
}

/// Drains a [`CallbackContext`] queue, running each posted callback in
/// order. Drive it from the task or thread that should own callbacks:
///
/// ```ignore
/// let (context, runner) = CallbackContext::channel();
/// tokio::spawn(runner.run());
/// ```
pub struct CallbackRunner {
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl CallbackRunner {
    /// Runs until every context handle has been dropped.
    pub async fn run(mut self) {
        debug!("callback runner started");
        while let Some(job) = self.receiver.recv().await {
            job();
        }
        debug!("callback runner finished");
    }
}

/// Handle to an in-flight asynchronous dispatch.
///
/// The handle controls scheduling only; the result travels through the
/// request's completion callback. Cancellation is honored strictly before
/// the transaction starts. Once execution has begun, the transaction runs
/// to commit or rollback and the completion is delivered normally.
pub struct DispatchHandle {
    cancelled: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl DispatchHandle {
    /// Requests cancellation. Effective only if execution has not started;
    /// the callback then receives [`DispatchError::Cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits until execution (or cancelled completion delivery) finished.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// The caller-facing request dispatcher.
///
/// Exactly one [`ResourceWorker`](crate::ResourceWorker) exists per
/// [`ResourceId`] for the dispatcher's lifetime.
pub struct Dispatcher {
    registry: WorkerRegistry,
    notifier: Arc<ChangeNotifier>,
    callback_context: Option<CallbackContext>,
}

impl Dispatcher {
    /// Creates a dispatcher over a host-provided store resolver.
    pub fn new(resolver: Arc<dyn StoreResolver>) -> Self {
        let notifier = Arc::new(ChangeNotifier::new());
        Dispatcher {
            registry: WorkerRegistry::new(
                resolver,
                Arc::clone(&notifier),
                BatchApplier::default(),
            ),
            notifier,
            callback_context: None,
        }
    }

    /// Creates a dispatcher with a non-default batch applier configuration.
    pub fn with_batch_applier(resolver: Arc<dyn StoreResolver>, batch: BatchApplier) -> Self {
        let notifier = Arc::new(ChangeNotifier::new());
        Dispatcher {
            registry: WorkerRegistry::new(resolver, Arc::clone(&notifier), batch),
            notifier,
            callback_context: None,
        }
    }

    /// Designates the context that callbacks requesting it are posted to.
    pub fn callback_context(mut self, context: CallbackContext) -> Self {
        self.callback_context = Some(context);
        self
    }

    /// The notifier used for observer registration.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Registers `observer` for changes to `id`, optionally including
    /// descendants of a store-level identifier.
    pub fn register_observer(
        &self,
        id: ResourceId,
        notify_for_descendants: bool,
        observer: Arc<dyn Observer>,
    ) {
        self.notifier.register(id, notify_for_descendants, observer);
    }

    /// Removes every registration of `observer`.
    pub fn unregister_observer(&self, observer: &Arc<dyn Observer>) {
        self.notifier.unregister(observer);
    }

    /// Number of workers created so far.
    pub fn worker_count(&self) -> usize {
        self.registry.worker_count()
    }

    /// Executes the request on the calling thread, blocking for the full
    /// transaction duration. Errors propagate to the caller; no completion
    /// callback is invoked on this path.
    #[instrument(skip(self, request), fields(resource = %id, kind = %request.kind()))]
    pub fn dispatch_sync<T>(
        &self,
        id: &ResourceId,
        request: Request<T>,
    ) -> Result<Response<T>, DispatchError> {
        self.registry.worker(id).execute(request)
    }

    /// Submits the request to the shared blocking pool and returns at once.
    ///
    /// The completion (success or error, including
    /// [`DispatchError::Cancelled`]) is delivered to the request's
    /// completion callback, on the pool thread or posted to the designated
    /// callback context if the request asked for it.
    ///
    /// Must be called from within a Tokio runtime context.
    #[instrument(skip(self, request), fields(resource = %id, kind = %request.kind()))]
    pub fn dispatch_async<T: Send + 'static>(
        &self,
        id: &ResourceId,
        mut request: Request<T>,
    ) -> DispatchHandle {
        let worker = self.registry.worker(id);
        let callback = request.take_callback();
        let wants_context = request.on_callback_context();
        let context = self.callback_context.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = tokio::task::spawn_blocking(move || {
            let outcome = if flag.load(Ordering::Acquire) {
                debug!("dispatch cancelled before execution");
                Err(DispatchError::Cancelled)
            } else {
                worker.execute(request)
            };
            deliver(callback, outcome, wants_context, context);
        });

        DispatchHandle { cancelled, join }
    }

    /// Builds, dispatches, and awaits one request, returning its response.
    ///
    /// Any completion callback already set on the request is replaced by the
    /// awaiting channel.
    pub async fn dispatch<T: Send + 'static>(
        &self,
        id: &ResourceId,
        mut request: Request<T>,
    ) -> Result<Response<T>, DispatchError> {
        let (sender, receiver) = oneshot::channel();
        let callback: CompletionCallback<T> = Box::new(move |outcome| {
            let _ = sender.send(outcome);
        });
        request.set_callback(callback);
        let _handle = self.dispatch_async(id, request);
        receiver
            .await
            .map_err(|_| DispatchError::CompletionDropped)?
    }

    // --- Synchronous convenience surface ---

    /// Inserts one row, returning its row identifier.
    pub fn insert_sync(
        &self,
        id: &ResourceId,
        table: &str,
        values: Values,
    ) -> Result<i64, DispatchError> {
        let request = RequestBuilder::new()
            .operation(OperationKind::Insert)
            .table(table)
            .values(values)
            .build()?;
        match self.dispatch_sync(id, request)? {
            Response::Inserted(row_id) => Ok(row_id),
            _ => unreachable!("insert produced a non-insert response"),
        }
    }

    /// Updates matching rows, returning the affected count.
    pub fn update_sync(
        &self,
        id: &ResourceId,
        table: &str,
        values: Values,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, DispatchError> {
        let mut builder = RequestBuilder::new()
            .operation(OperationKind::Update)
            .table(table)
            .values(values)
            .selection_args(args.to_vec());
        if let Some(selection) = selection {
            builder = builder.selection(selection);
        }
        match self.dispatch_sync(id, builder.build()?)? {
            Response::Updated(affected) => Ok(affected),
            _ => unreachable!("update produced a non-update response"),
        }
    }

    /// Deletes matching rows, returning the affected count.
    pub fn delete_sync(
        &self,
        id: &ResourceId,
        table: &str,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, DispatchError> {
        let mut builder = RequestBuilder::new()
            .operation(OperationKind::Delete)
            .table(table)
            .selection_args(args.to_vec());
        if let Some(selection) = selection {
            builder = builder.selection(selection);
        }
        match self.dispatch_sync(id, builder.build()?)? {
            Response::Deleted(affected) => Ok(affected),
            _ => unreachable!("delete produced a non-delete response"),
        }
    }

    /// Applies a batch atomically, returning one result per operation.
    pub fn apply_batch_sync(
        &self,
        id: &ResourceId,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<BatchResult>, DispatchError> {
        let request = RequestBuilder::new()
            .operation(OperationKind::ApplyBatch)
            .operations(operations)
            .build()?;
        match self.dispatch_sync(id, request)? {
            Response::Batch(results) => Ok(results),
            _ => unreachable!("apply-batch produced a non-batch response"),
        }
    }
}

fn deliver<T: Send + 'static>(
    callback: Option<CompletionCallback<T>>,
    outcome: Result<Response<T>, DispatchError>,
    wants_context: bool,
    context: Option<CallbackContext>,
) {
    let Some(callback) = callback else {
        if let Err(error) = outcome {
            warn!(%error, "async dispatch failed with no completion callback");
        }
        return;
    };

    match context {
        Some(context) if wants_context => {
            if context.post(Box::new(move || callback(outcome))).is_err() {
                warn!("callback context closed; completion dropped");
            }
        }
        _ => callback(outcome),
    }
}

/// Awaitable convenience operations over a dispatcher.
///
/// The trait mirrors the dispatcher's synchronous convenience surface for
/// async callers and gives host code a mockable seam: anything that can hand
/// out a [`Dispatcher`] gets the whole surface for free.
#[async_trait]
pub trait AsyncOps: Send + Sync {
    fn dispatcher(&self) -> &Dispatcher;

    /// Inserts one row, returning its row identifier.
    async fn insert(
        &self,
        id: &ResourceId,
        table: &str,
        values: Values,
    ) -> Result<i64, DispatchError> {
        let request = RequestBuilder::new()
            .operation(OperationKind::Insert)
            .table(table)
            .values(values)
            .build()?;
        match self.dispatcher().dispatch(id, request).await? {
            Response::Inserted(row_id) => Ok(row_id),
            _ => unreachable!("insert produced a non-insert response"),
        }
    }

    /// Updates matching rows, returning the affected count.
    async fn update(
        &self,
        id: &ResourceId,
        table: &str,
        values: Values,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, DispatchError> {
        let mut builder = RequestBuilder::new()
            .operation(OperationKind::Update)
            .table(table)
            .values(values)
            .selection_args(args.to_vec());
        if let Some(selection) = selection {
            builder = builder.selection(selection);
        }
        match self.dispatcher().dispatch(id, builder.build()?).await? {
            Response::Updated(affected) => Ok(affected),
            _ => unreachable!("update produced a non-update response"),
        }
    }

    /// Deletes matching rows, returning the affected count.
    async fn delete(
        &self,
        id: &ResourceId,
        table: &str,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, DispatchError> {
        let mut builder = RequestBuilder::new()
            .operation(OperationKind::Delete)
            .table(table)
            .selection_args(args.to_vec());
        if let Some(selection) = selection {
            builder = builder.selection(selection);
        }
        match self.dispatcher().dispatch(id, builder.build()?).await? {
            Response::Deleted(affected) => Ok(affected),
            _ => unreachable!("delete produced a non-delete response"),
        }
    }

    /// Applies a batch atomically, returning one result per operation.
    async fn apply_batch(
        &self,
        id: &ResourceId,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<BatchResult>, DispatchError> {
        let request = RequestBuilder::new()
            .operation(OperationKind::ApplyBatch)
            .operations(operations)
            .build()?;
        match self.dispatcher().dispatch(id, request).await? {
            Response::Batch(results) => Ok(results),
            _ => unreachable!("apply-batch produced a non-batch response"),
        }
    }
}

#[async_trait]
impl AsyncOps for Dispatcher {
    fn dispatcher(&self) -> &Dispatcher {
        self
    }
}
