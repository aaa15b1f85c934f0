//! # Facade Errors
//!
//! This module defines the common error type used throughout the dispatch
//! facade. By centralizing error definitions, every dispatch path, sync
//! return values and async completion callbacks alike, reports failures
//! with the same tagged kinds.

use crate::request::OperationKind;
use crate::store::BoxedError;

/// Errors surfaced by the dispatch facade.
///
/// Every transactional error is reported only after the transaction has been
/// rolled back; no partial writes are ever visible behind one of these.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The host resolver could not open the store for this resource. The
    /// request failed before any transaction was opened.
    #[error("store unavailable: {0}")]
    StoreUnavailable(BoxedError),

    /// The request was malformed and was rejected before any store access.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An underlying store primitive (or the commit itself) failed; the
    /// transaction was rolled back.
    #[error("{operation} failed: {source}")]
    OperationFailure {
        operation: OperationKind,
        source: BoxedError,
    },

    /// The request's result converter failed; the transaction was rolled
    /// back.
    #[error("result conversion failed: {0}")]
    ConverterFailure(BoxedError),

    /// A batch ran too many operations without reaching a yield-allowed
    /// operation; the whole batch was rolled back.
    #[error("too many operations between yield points (limit {limit}, {yield_points} yield points taken)")]
    BatchOverflow { limit: usize, yield_points: usize },

    /// An async dispatch was cancelled before its transaction started.
    #[error("dispatch cancelled before execution")]
    Cancelled,

    /// The completion channel was dropped before a result was delivered.
    #[error("completion channel dropped before a result was delivered")]
    CompletionDropped,
}

impl DispatchError {
    pub(crate) fn operation(kind: OperationKind, source: BoxedError) -> Self {
        DispatchError::OperationFailure {
            operation: kind,
            source,
        }
    }
}
