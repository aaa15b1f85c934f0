//! # Resource Worker
//!
//! A [`ResourceWorker`] owns execution of requests targeting one resource.
//! Every request runs inside a store transaction: a single operation opens,
//! applies, and commits (or rolls back) its own transaction, while a batch
//! hands the open transaction to the [`BatchApplier`](crate::BatchApplier).
//!
//! # Architecture Note
//! The original form of this engine detected "am I inside a batch?" with a
//! thread-local flag so a nested single operation would not open a second
//! transaction. Here the open transaction and its [`ChangeSet`] are explicit
//! parameters of the in-transaction application path
//! ([`apply_operation`](ResourceWorker::apply_operation)); a sub-operation
//! executed from a batch reuses the outer transaction by construction, and
//! the reentrancy rule is testable without real threads.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::batch::{BatchApplier, BatchOperation};
use crate::error::DispatchError;
use crate::notifier::{ChangeNotifier, ChangeSet};
use crate::request::{OperationKind, Request};
use crate::response::{BatchResult, Response};
use crate::store::{StoreResolver, StoreTransaction};
use crate::resource::ResourceId;

/// Executes requests against one resource, inside guarded transactions.
///
/// Workers are created lazily by the
/// [`WorkerRegistry`](crate::WorkerRegistry) and live for the process
/// lifetime. The store handle is resolved per request, so an unavailable
/// store fails the request rather than worker creation.
pub struct ResourceWorker {
    id: ResourceId,
    resolver: Arc<dyn StoreResolver>,
    notifier: Arc<ChangeNotifier>,
    batch: BatchApplier,
}

impl ResourceWorker {
    pub(crate) fn new(
        id: ResourceId,
        resolver: Arc<dyn StoreResolver>,
        notifier: Arc<ChangeNotifier>,
        batch: BatchApplier,
    ) -> Self {
        ResourceWorker {
            id,
            resolver,
            notifier,
            batch,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Executes one request: resolve the store, open a transaction, apply,
    /// then commit on success or roll back on any error. The close runs on
    /// every exit path; the transaction's change set is flushed only after
    /// a successful commit.
    #[instrument(skip(self, request), fields(resource = %self.id, kind = %request.kind()))]
    pub fn execute<T>(&self, request: Request<T>) -> Result<Response<T>, DispatchError> {
        let store = self
            .resolver
            .open(&self.id)
            .map_err(DispatchError::StoreUnavailable)?;

        let changes = ChangeSet::new();
        let mut txn = store.begin().map_err(DispatchError::StoreUnavailable)?;

        let result = match request.kind() {
            OperationKind::ApplyBatch => self
                .batch
                .apply(self, txn.as_mut(), &changes, request.operations())
                .map(Response::Batch),
            _ => self.apply_single(txn.as_mut(), &changes, &request),
        };

        match result {
            Ok(response) => {
                txn.commit()
                    .map_err(|e| DispatchError::operation(request.kind(), e))?;
                self.notifier.flush(&changes);
                debug!("request committed");
                Ok(response)
            }
            Err(error) => {
                if let Err(rollback_error) = txn.rollback() {
                    warn!(%rollback_error, "rollback failed");
                }
                debug!(%error, "request rolled back");
                Err(error)
            }
        }
    }

    /// Applies a single non-batch operation within an open transaction.
    fn apply_single<T>(
        &self,
        txn: &mut (dyn StoreTransaction + '_),
        changes: &ChangeSet,
        request: &Request<T>,
    ) -> Result<Response<T>, DispatchError> {
        match request.kind() {
            OperationKind::Insert => {
                let row_id = txn
                    .insert(request.table(), request.values())
                    .map_err(|e| DispatchError::operation(OperationKind::Insert, e))?;
                changes.mark(self.id.table_child(request.table()));
                Ok(Response::Inserted(row_id))
            }
            OperationKind::Update => {
                let affected = txn
                    .update(
                        request.table(),
                        request.values(),
                        request.selection(),
                        request.selection_args(),
                    )
                    .map_err(|e| DispatchError::operation(OperationKind::Update, e))?;
                if affected > 0 {
                    changes.mark(self.id.table_child(request.table()));
                }
                Ok(Response::Updated(affected))
            }
            OperationKind::Delete => {
                let affected = txn
                    .delete(request.table(), request.selection(), request.selection_args())
                    .map_err(|e| DispatchError::operation(OperationKind::Delete, e))?;
                if affected > 0 {
                    changes.mark(self.id.table_child(request.table()));
                }
                Ok(Response::Deleted(affected))
            }
            OperationKind::Query => {
                let rows = if request.is_raw_query() {
                    txn.raw_query(
                        request.selection().unwrap_or_default(),
                        request.selection_args(),
                    )
                } else {
                    txn.query(&request.query_spec())
                }
                .map_err(|e| DispatchError::operation(OperationKind::Query, e))?;

                let value = request
                    .converter()
                    .convert(rows)
                    .map_err(DispatchError::ConverterFailure)?;
                Ok(Response::Query(value))
            }
            OperationKind::ApplyBatch => Err(DispatchError::InvalidRequest(
                "a batch cannot appear inside another batch".into(),
            )),
        }
    }

    /// Applies one batch sub-operation within the already-open outer
    /// transaction. This is the reentrant path: it never begins, commits, or
    /// rolls back, and marks touched resources in the outer transaction's
    /// change set.
    pub(crate) fn apply_operation(
        &self,
        txn: &mut (dyn StoreTransaction + '_),
        changes: &ChangeSet,
        operation: &BatchOperation,
    ) -> Result<BatchResult, DispatchError> {
        match operation.kind() {
            OperationKind::Insert => {
                let row_id = txn
                    .insert(operation.table(), operation.values())
                    .map_err(|e| DispatchError::operation(OperationKind::Insert, e))?;
                changes.mark(self.id.table_child(operation.table()));
                Ok(BatchResult::Inserted(row_id))
            }
            OperationKind::Update => {
                let affected = txn
                    .update(
                        operation.table(),
                        operation.values(),
                        operation.selection_clause(),
                        operation.selection_args(),
                    )
                    .map_err(|e| DispatchError::operation(OperationKind::Update, e))?;
                if affected > 0 {
                    changes.mark(self.id.table_child(operation.table()));
                }
                Ok(BatchResult::Affected(affected))
            }
            OperationKind::Delete => {
                let affected = txn
                    .delete(
                        operation.table(),
                        operation.selection_clause(),
                        operation.selection_args(),
                    )
                    .map_err(|e| DispatchError::operation(OperationKind::Delete, e))?;
                if affected > 0 {
                    changes.mark(self.id.table_child(operation.table()));
                }
                Ok(BatchResult::Affected(affected))
            }
            kind => Err(DispatchError::InvalidRequest(format!(
                "{kind} is not a valid batch sub-operation"
            ))),
        }
    }
}
