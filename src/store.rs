//! # Tabular Store Capability
//!
//! The traits in this module describe the storage engine the dispatch facade
//! executes against. The facade never implements storage itself; a host
//! supplies a [`StoreResolver`] that turns a [`ResourceId`](crate::ResourceId)
//! into a [`TabularStore`] handle, and every operation runs inside a
//! [`StoreTransaction`] obtained from that handle.
//!
//! # Architecture Note
//! Why traits instead of a concrete engine?
//! By defining a contract (`TabularStore` + `StoreTransaction`) that any
//! tabular backend can satisfy, the worker and batch logic are written *once*
//! and reused over SQLite-style embedded stores, server connections, or the
//! in-memory [`MemoryStore`](crate::mock::MemoryStore) used in tests.
//!
//! The transaction trait is deliberately blocking: `dispatch_sync` must run a
//! whole transaction on the calling thread, so the store seam cannot be an
//! async interface driven by an executor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceId;

/// Boxed error type used at every host-facing seam.
///
/// Store backends, converters, and observers all have their own error types;
/// the facade carries them as trait objects and wraps them in
/// [`DispatchError`](crate::DispatchError) variants.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// A single column value.
///
/// Mirrors the value kinds a tabular backend can hold. `bool` converts to
/// `Integer` 0/1, matching the usual SQLite-style affinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

/// Ordered column name to value map, used for insert and update payloads.
pub type Values = BTreeMap<String, Value>;

/// A single result row.
pub type Row = BTreeMap<String, Value>;

/// Builds a [`Values`] map from `(column, value)` pairs.
///
/// ```
/// use rowgate::{values, Value};
///
/// let v = values([("name", Value::from("ada")), ("age", Value::from(36))]);
/// assert_eq!(v.len(), 2);
/// ```
pub fn values<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Values
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A materialized query cursor.
///
/// Backends return the full result set; the facade hands it to the request's
/// [`RowsConverter`] before the transaction commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows(pub Vec<Row>);

impl Rows {
    pub fn new() -> Self {
        Rows(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&Row> {
        self.0.first()
    }

    pub fn into_vec(self) -> Vec<Row> {
        self.0
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Vec<Row>> for Rows {
    fn from(rows: Vec<Row>) -> Self {
        Rows(rows)
    }
}

/// A structured query specification built by the worker from a request.
///
/// `selection` uses positional `?` placeholders bound from `args` in order.
#[derive(Debug, Clone, Copy)]
pub struct QuerySpec<'a> {
    pub table: &'a str,
    pub projection: &'a [String],
    pub selection: Option<&'a str>,
    pub args: &'a [Value],
    pub group_by: Option<&'a str>,
    pub having: Option<&'a str>,
    pub sort_order: Option<&'a str>,
    pub limit: Option<&'a str>,
}

/// A handle to one tabular store (one database).
///
/// Implementations must provide mutual exclusion between concurrently *open*
/// transactions on the same store; that lock is the facade's single
/// serialization point per resource.
pub trait TabularStore: Send + Sync {
    /// Opens a transaction, blocking until the store's transaction lock is
    /// acquired.
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, BoxedError>;
}

/// An open transaction against a [`TabularStore`].
///
/// All effects become visible atomically at [`commit`](Self::commit) and are
/// discarded by [`rollback`](Self::rollback). Dropping an unfinished
/// transaction must behave like a rollback.
pub trait StoreTransaction {
    /// Inserts one row, returning its row identifier.
    fn insert(&mut self, table: &str, values: &Values) -> Result<i64, BoxedError>;

    /// Updates all rows matching `selection`, returning the affected count.
    fn update(
        &mut self,
        table: &str,
        values: &Values,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, BoxedError>;

    /// Deletes all rows matching `selection`, returning the affected count.
    fn delete(
        &mut self,
        table: &str,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, BoxedError>;

    /// Runs a structured query.
    fn query(&mut self, spec: &QuerySpec<'_>) -> Result<Rows, BoxedError>;

    /// Runs a raw query, treating `text` as literal query text for the
    /// backend's own dialect.
    fn raw_query(&mut self, text: &str, args: &[Value]) -> Result<Rows, BoxedError>;

    /// Briefly releases and reacquires the store's transaction lock to
    /// relieve contention from other waiters, waiting at most `max_wait`.
    ///
    /// Returns whether contention was actually relieved (another waiter got
    /// the lock). Operations applied so far stay part of this transaction;
    /// a yield never commits partial work.
    fn yield_lock(&mut self, max_wait: Duration) -> Result<bool, BoxedError>;

    /// Commits, publishing all effects atomically.
    fn commit(self: Box<Self>) -> Result<(), BoxedError>;

    /// Rolls back, discarding all effects.
    fn rollback(self: Box<Self>) -> Result<(), BoxedError>;
}

/// Host-provided resolution from a resource identifier to a store handle.
///
/// Resolution runs once per request, on the thread executing it, so a host
/// may open lazily, pool, or cache as it sees fit. A resolution failure
/// surfaces as [`DispatchError::StoreUnavailable`](crate::DispatchError) and
/// no transaction is opened.
pub trait StoreResolver: Send + Sync {
    fn open(&self, id: &ResourceId) -> Result<Arc<dyn TabularStore>, BoxedError>;
}

/// Maps a materialized cursor into a caller-defined type.
///
/// Invoked exactly once per query, inside the open transaction; a conversion
/// error rolls the transaction back.
pub trait RowsConverter<T>: Send + Sync {
    fn convert(&self, rows: Rows) -> Result<T, BoxedError>;
}

/// Any `Fn(Rows) -> Result<T, BoxedError>` is a converter.
impl<T, F> RowsConverter<T> for F
where
    F: Fn(Rows) -> Result<T, BoxedError> + Send + Sync,
{
    fn convert(&self, rows: Rows) -> Result<T, BoxedError> {
        self(rows)
    }
}

/// The default converter: hands the cursor back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConverter;

impl RowsConverter<Rows> for IdentityConverter {
    fn convert(&self, rows: Rows) -> Result<Rows, BoxedError> {
        Ok(rows)
    }
}
