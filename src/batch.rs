//! # Batch Application
//!
//! A batch is an ordered list of write sub-operations applied as one logical
//! transaction: either every effect is visible after commit or none is. The
//! [`BatchApplier`] also keeps long batches from starving other contenders
//! for the resource's transaction lock: sub-operations marked yield-allowed
//! become yield points where the store lock is briefly released, and a batch
//! that runs too long without one fails with
//! [`DispatchError::BatchOverflow`] instead of holding the lock forever.

use std::time::Duration;

use tracing::{debug, trace};

use crate::error::DispatchError;
use crate::notifier::ChangeSet;
use crate::request::OperationKind;
use crate::response::BatchResult;
use crate::store::{StoreTransaction, Value, Values};
use crate::worker::ResourceWorker;

/// Ceiling on operations applied between permitted yield points.
pub const MAX_OPERATIONS_PER_YIELD_POINT: usize = 2000;

/// Bounded wait handed to the store's yield primitive at a yield point.
pub const SLEEP_AFTER_YIELD: Duration = Duration::from_millis(4000);

/// One write sub-operation of a batch.
///
/// ```
/// use rowgate::{values, BatchOperation, Value};
///
/// let op = BatchOperation::update("people", values([("age", 37)]))
///     .selection("name = ?", vec![Value::from("ada")])
///     .allow_yield();
/// assert!(op.yield_allowed());
/// ```
#[derive(Debug, Clone)]
pub struct BatchOperation {
    kind: OperationKind,
    table: String,
    values: Values,
    selection: Option<String>,
    selection_args: Vec<Value>,
    yield_allowed: bool,
}

impl BatchOperation {
    pub fn insert(table: impl Into<String>, values: Values) -> Self {
        BatchOperation {
            kind: OperationKind::Insert,
            table: table.into(),
            values,
            selection: None,
            selection_args: Vec::new(),
            yield_allowed: false,
        }
    }

    pub fn update(table: impl Into<String>, values: Values) -> Self {
        BatchOperation {
            kind: OperationKind::Update,
            table: table.into(),
            values,
            selection: None,
            selection_args: Vec::new(),
            yield_allowed: false,
        }
    }

    pub fn delete(table: impl Into<String>) -> Self {
        BatchOperation {
            kind: OperationKind::Delete,
            table: table.into(),
            values: Values::new(),
            selection: None,
            selection_args: Vec::new(),
            yield_allowed: false,
        }
    }

    /// Restricts the operation to rows matching `selection`, with positional
    /// `?` placeholders bound from `args`.
    pub fn selection(mut self, selection: impl Into<String>, args: Vec<Value>) -> Self {
        self.selection = Some(selection.into());
        self.selection_args = args;
        self
    }

    /// Marks this operation as a permitted yield point.
    pub fn allow_yield(mut self) -> Self {
        self.yield_allowed = true;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn selection_clause(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn selection_args(&self) -> &[Value] {
        &self.selection_args
    }

    pub fn yield_allowed(&self) -> bool {
        self.yield_allowed
    }

    pub(crate) fn validate(&self) -> Result<(), DispatchError> {
        if self.table.is_empty() {
            return Err(DispatchError::InvalidRequest(format!(
                "batch {} requires a table name",
                self.kind
            )));
        }
        if matches!(self.kind, OperationKind::Insert | OperationKind::Update)
            && self.values.is_empty()
        {
            return Err(DispatchError::InvalidRequest(format!(
                "batch {} requires a non-empty values map",
                self.kind
            )));
        }
        Ok(())
    }
}

/// Applies an ordered operation list inside an already-open transaction.
///
/// The applier never opens or closes the transaction itself; the worker owns
/// the commit-or-rollback close, so an applier error always ends in a
/// rollback of the whole batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchApplier {
    max_operations_per_yield_point: usize,
    yield_wait: Duration,
}

impl Default for BatchApplier {
    fn default() -> Self {
        BatchApplier {
            max_operations_per_yield_point: MAX_OPERATIONS_PER_YIELD_POINT,
            yield_wait: SLEEP_AFTER_YIELD,
        }
    }
}

impl BatchApplier {
    pub fn new() -> Self {
        BatchApplier::default()
    }

    /// Overrides the operation ceiling and yield wait.
    pub fn with_limits(max_operations_per_yield_point: usize, yield_wait: Duration) -> Self {
        BatchApplier {
            max_operations_per_yield_point,
            yield_wait,
        }
    }

    /// Applies `operations` in submission order against the open
    /// transaction, returning one result per operation, in order.
    ///
    /// Sub-operations run through the worker's in-transaction path, so they
    /// reuse the outer transaction rather than opening their own. The first
    /// failing sub-operation aborts the whole batch.
    pub(crate) fn apply(
        &self,
        worker: &ResourceWorker,
        txn: &mut (dyn StoreTransaction + '_),
        changes: &ChangeSet,
        operations: &[BatchOperation],
    ) -> Result<Vec<BatchResult>, DispatchError> {
        let mut results = Vec::with_capacity(operations.len());
        let mut operations_since_yield = 0usize;
        let mut yield_points = 0usize;

        for (index, operation) in operations.iter().enumerate() {
            operations_since_yield += 1;
            if operations_since_yield > self.max_operations_per_yield_point {
                return Err(DispatchError::BatchOverflow {
                    limit: self.max_operations_per_yield_point,
                    yield_points,
                });
            }

            if index > 0 && operation.yield_allowed() {
                operations_since_yield = 0;
                let relieved = txn
                    .yield_lock(self.yield_wait)
                    .map_err(|e| DispatchError::operation(operation.kind(), e))?;
                if relieved {
                    yield_points += 1;
                    trace!(index, yield_points, "transaction lock yielded");
                }
            }

            results.push(worker.apply_operation(txn, changes, operation)?);
        }

        debug!(
            operations = operations.len(),
            yield_points, "batch applied"
        );
        Ok(results)
    }
}
