//! # Response Model
//!
//! A [`Response`] is kind-tagged: the populated variant always matches the
//! request's [`OperationKind`](crate::OperationKind), so a caller can never
//! observe an insert id and an update count at the same time. Batch
//! responses carry exactly one [`BatchResult`] per submitted sub-operation,
//! in submission order.

use serde::{Deserialize, Serialize};

use crate::request::OperationKind;
use crate::store::Rows;

/// The result of one dispatched request.
#[derive(Debug)]
pub enum Response<T = Rows> {
    /// Converted query value.
    Query(T),
    /// Row identifier of the inserted row.
    Inserted(i64),
    /// Number of rows affected by an update.
    Updated(u64),
    /// Number of rows affected by a delete.
    Deleted(u64),
    /// Per-operation results of a batch, in submission order.
    Batch(Vec<BatchResult>),
}

impl<T> Response<T> {
    /// The operation kind this response answers.
    pub fn kind(&self) -> OperationKind {
        match self {
            Response::Query(_) => OperationKind::Query,
            Response::Inserted(_) => OperationKind::Insert,
            Response::Updated(_) => OperationKind::Update,
            Response::Deleted(_) => OperationKind::Delete,
            Response::Batch(_) => OperationKind::ApplyBatch,
        }
    }

    pub fn into_query_value(self) -> Option<T> {
        match self {
            Response::Query(value) => Some(value),
            _ => None,
        }
    }

    pub fn row_id(&self) -> Option<i64> {
        match self {
            Response::Inserted(id) => Some(*id),
            _ => None,
        }
    }

    /// Affected-row count of an update or delete.
    pub fn affected(&self) -> Option<u64> {
        match self {
            Response::Updated(count) | Response::Deleted(count) => Some(*count),
            _ => None,
        }
    }

    pub fn batch_results(&self) -> Option<&[BatchResult]> {
        match self {
            Response::Batch(results) => Some(results),
            _ => None,
        }
    }

    pub fn into_batch_results(self) -> Option<Vec<BatchResult>> {
        match self {
            Response::Batch(results) => Some(results),
            _ => None,
        }
    }
}

/// The result of one batch sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchResult {
    /// Row identifier produced by an insert sub-operation.
    Inserted(i64),
    /// Affected-row count of an update or delete sub-operation.
    Affected(u64),
}
