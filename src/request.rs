//! # Request Model
//!
//! A [`Request`] is the immutable description of one data operation: which
//! table, which [`OperationKind`], the write payload or query shape, how to
//! convert the result, and where to deliver the completion. Requests are
//! built through [`RequestBuilder`], whose `build()` is the validating
//! constructor: a malformed request is rejected with
//! [`DispatchError::InvalidRequest`] before any store access.
//!
//! A request is constructed once and consumed by exactly one dispatch call.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::batch::BatchOperation;
use crate::error::DispatchError;
use crate::response::Response;
use crate::store::{IdentityConverter, QuerySpec, Rows, RowsConverter, Value, Values};

/// The kind of data operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Insert,
    Query,
    Update,
    Delete,
    ApplyBatch,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Insert => "insert",
            OperationKind::Query => "query",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::ApplyBatch => "apply-batch",
        };
        f.write_str(name)
    }
}

/// Completion handler for asynchronous dispatch.
///
/// One handler covers every operation kind: the [`Response`] it receives is
/// tagged, so the handler pattern-matches instead of implementing one
/// callback interface per kind.
pub type CompletionCallback<T> =
    Box<dyn FnOnce(Result<Response<T>, DispatchError>) + Send + 'static>;

/// An immutable description of one data operation.
///
/// `T` is the query result type produced by the request's converter; for
/// write operations it stays at the default [`Rows`] and is never produced.
pub struct Request<T = Rows> {
    kind: OperationKind,
    table: String,
    values: Values,
    selection: Option<String>,
    selection_args: Vec<Value>,
    projection: Vec<String>,
    group_by: Option<String>,
    having: Option<String>,
    sort_order: Option<String>,
    limit: Option<String>,
    raw_query: bool,
    operations: Vec<BatchOperation>,
    converter: Arc<dyn RowsConverter<T>>,
    callback: Option<CompletionCallback<T>>,
    on_callback_context: bool,
}

impl Request<Rows> {
    /// Starts a builder with the identity converter.
    pub fn builder() -> RequestBuilder<Rows> {
        RequestBuilder::new()
    }
}

impl<T> Request<T> {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn selection_args(&self) -> &[Value] {
        &self.selection_args
    }

    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    pub fn is_raw_query(&self) -> bool {
        self.raw_query
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Whether the completion callback should be posted to the designated
    /// callback context instead of running on the pool thread.
    pub fn on_callback_context(&self) -> bool {
        self.on_callback_context
    }

    pub(crate) fn converter(&self) -> &dyn RowsConverter<T> {
        self.converter.as_ref()
    }

    pub(crate) fn take_callback(&mut self) -> Option<CompletionCallback<T>> {
        self.callback.take()
    }

    pub(crate) fn set_callback(&mut self, callback: CompletionCallback<T>) {
        self.callback = Some(callback);
    }

    /// The structured query shape of this request.
    pub(crate) fn query_spec(&self) -> QuerySpec<'_> {
        QuerySpec {
            table: &self.table,
            projection: &self.projection,
            selection: self.selection.as_deref(),
            args: &self.selection_args,
            group_by: self.group_by.as_deref(),
            having: self.having.as_deref(),
            sort_order: self.sort_order.as_deref(),
            limit: self.limit.as_deref(),
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("values", &self.values)
            .field("selection", &self.selection)
            .field("selection_args", &self.selection_args)
            .field("projection", &self.projection)
            .field("raw_query", &self.raw_query)
            .field("operations", &self.operations.len())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Staged builder for [`Request`].
///
/// Setting a converter retargets the result type and therefore clears any
/// completion callback set so far; set the converter first.
pub struct RequestBuilder<T = Rows> {
    kind: Option<OperationKind>,
    table: String,
    values: Values,
    selection: Option<String>,
    selection_args: Vec<Value>,
    projection: Vec<String>,
    group_by: Option<String>,
    having: Option<String>,
    sort_order: Option<String>,
    limit: Option<String>,
    raw_query: bool,
    operations: Vec<BatchOperation>,
    converter: Arc<dyn RowsConverter<T>>,
    callback: Option<CompletionCallback<T>>,
    on_callback_context: bool,
}

impl RequestBuilder<Rows> {
    pub fn new() -> Self {
        RequestBuilder {
            kind: None,
            table: String::new(),
            values: Values::new(),
            selection: None,
            selection_args: Vec::new(),
            projection: Vec::new(),
            group_by: None,
            having: None,
            sort_order: None,
            limit: None,
            raw_query: false,
            operations: Vec::new(),
            converter: Arc::new(IdentityConverter),
            callback: None,
            on_callback_context: false,
        }
    }
}

impl Default for RequestBuilder<Rows> {
    fn default() -> Self {
        RequestBuilder::new()
    }
}

impl<T> RequestBuilder<T> {
    pub fn operation(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Adds one column value to the write payload.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Merges a whole payload map into the write payload.
    pub fn values(mut self, values: Values) -> Self {
        self.values.extend(values);
        self
    }

    pub fn selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }

    pub fn selection_arg(mut self, arg: impl Into<Value>) -> Self {
        self.selection_args.push(arg.into());
        self
    }

    pub fn selection_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.selection_args.extend(args);
        self
    }

    pub fn projection_column(mut self, column: impl Into<String>) -> Self {
        self.projection.push(column.into());
        self
    }

    pub fn projection(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        self.projection.extend(columns);
        self
    }

    pub fn group_by(mut self, group_by: impl Into<String>) -> Self {
        self.group_by = Some(group_by.into());
        self
    }

    pub fn having(mut self, having: impl Into<String>) -> Self {
        self.having = Some(having.into());
        self
    }

    pub fn sort_order(mut self, sort_order: impl Into<String>) -> Self {
        self.sort_order = Some(sort_order.into());
        self
    }

    pub fn limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Treats the selection string as literal query text instead of a
    /// structured selection. Only valid for queries.
    pub fn raw_query(mut self, raw: bool) -> Self {
        self.raw_query = raw;
        self
    }

    pub fn batch_operation(mut self, operation: BatchOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn operations(mut self, operations: impl IntoIterator<Item = BatchOperation>) -> Self {
        self.operations.extend(operations);
        self
    }

    /// Replaces the result converter, retargeting the query result type.
    ///
    /// Any completion callback set so far is cleared, since it was typed for
    /// the previous result type.
    pub fn converter<U>(self, converter: impl RowsConverter<U> + 'static) -> RequestBuilder<U> {
        RequestBuilder {
            kind: self.kind,
            table: self.table,
            values: self.values,
            selection: self.selection,
            selection_args: self.selection_args,
            projection: self.projection,
            group_by: self.group_by,
            having: self.having,
            sort_order: self.sort_order,
            limit: self.limit,
            raw_query: self.raw_query,
            operations: self.operations,
            converter: Arc::new(converter),
            callback: None,
            on_callback_context: self.on_callback_context,
        }
    }

    /// Sets the completion handler for asynchronous dispatch.
    pub fn on_complete(
        mut self,
        callback: impl FnOnce(Result<Response<T>, DispatchError>) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Requests delivery of the completion on the dispatcher's designated
    /// callback context instead of the pool thread.
    pub fn deliver_on_callback_context(mut self, on_context: bool) -> Self {
        self.on_callback_context = on_context;
        self
    }

    /// Validates the configuration and produces the immutable request.
    pub fn build(self) -> Result<Request<T>, DispatchError> {
        let kind = self
            .kind
            .ok_or_else(|| DispatchError::InvalidRequest("operation kind not set".into()))?;

        match kind {
            OperationKind::ApplyBatch => {
                if self.operations.is_empty() {
                    return Err(DispatchError::InvalidRequest(
                        "apply-batch requires at least one operation".into(),
                    ));
                }
            }
            _ => {
                if self.table.is_empty() {
                    return Err(DispatchError::InvalidRequest(format!(
                        "{kind} requires a table name"
                    )));
                }
                if !self.operations.is_empty() {
                    return Err(DispatchError::InvalidRequest(format!(
                        "batch operations are only valid for apply-batch, not {kind}"
                    )));
                }
            }
        }

        if matches!(kind, OperationKind::Insert | OperationKind::Update) && self.values.is_empty() {
            return Err(DispatchError::InvalidRequest(format!(
                "{kind} requires a non-empty values map"
            )));
        }

        if self.raw_query {
            if kind != OperationKind::Query {
                return Err(DispatchError::InvalidRequest(
                    "raw query text is only valid for queries".into(),
                ));
            }
            if self.selection.as_deref().map_or(true, str::is_empty) {
                return Err(DispatchError::InvalidRequest(
                    "raw query requires query text in the selection".into(),
                ));
            }
        }

        for operation in &self.operations {
            operation.validate()?;
        }

        Ok(Request {
            kind,
            table: self.table,
            values: self.values,
            selection: self.selection,
            selection_args: self.selection_args,
            projection: self.projection,
            group_by: self.group_by,
            having: self.having,
            sort_order: self.sort_order,
            limit: self.limit,
            raw_query: self.raw_query,
            operations: self.operations,
            converter: self.converter,
            callback: self.callback,
            on_callback_context: self.on_callback_context,
        })
    }
}
