//! # In-Memory Store & Testing Guide
//!
//! [`MemoryStore`] implements the full [`TabularStore`] contract entirely
//! in memory: snapshot-isolated transactions behind a per-store transaction
//! lock, a contention-aware yield primitive, and instrumentation counters.
//! It lets you exercise dispatcher, worker, and batch behavior in fast,
//! deterministic tests without a real database. This module ships in the
//! library (not behind `#[cfg(test)]`) so it works with integration tests
//! and with host test suites.
//!
//! | Feature | MemoryStore | Real backend |
//! |---------|-------------|--------------|
//! | **Speed** | Instant (in-memory) | Disk/network bound |
//! | **Transactions** | Snapshot + lock, atomic commit | Engine-native |
//! | **Selections** | `col = ?` clauses joined by `AND` | Full dialect |
//! | **Instrumentation** | Open/yield counters built in | None |
//!
//! ## Supported query surface
//!
//! - Selections: `column = ?` clauses joined with `AND`, bound positionally.
//! - Sort: `column`, `column ASC`, `column DESC`.
//! - Limit: `count` or `offset,count`.
//! - Raw queries: the debug form `count:<table>` returns a single row
//!   `{"count": n}`. Anything else is rejected.
//! - `group_by`/`having` are rejected; the facade passes them through to
//!   real backends untouched, and nothing in-memory needs them.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::resource::ResourceId;
use crate::store::{
    BoxedError, QuerySpec, Row, Rows, StoreResolver, StoreTransaction, TabularStore, Value, Values,
};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<(i64, Row)>,
}

type Tables = HashMap<String, Table>;

/// An in-memory [`TabularStore`] with real transaction semantics.
///
/// A transaction snapshots the committed state at `begin` and publishes its
/// working copy atomically at `commit`; rollback (or drop) discards it. The
/// transaction lock makes concurrently open transactions mutually exclusive,
/// exactly like the per-resource lock of a real store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    base: Mutex<Tables>,
    txn_lock: Mutex<()>,
    next_row_id: AtomicI64,
    waiters: AtomicUsize,
    open_transactions: AtomicUsize,
    max_open_transactions: AtomicUsize,
    transactions_opened: AtomicUsize,
    yields_taken: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Committed rows of `table`, for test assertions.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.base
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.iter().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default()
    }

    /// Committed row count of `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.base
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Total transactions opened over the store's lifetime.
    pub fn transactions_opened(&self) -> usize {
        self.transactions_opened.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open transactions observed.
    pub fn max_open_transactions(&self) -> usize {
        self.max_open_transactions.load(Ordering::SeqCst)
    }

    /// Number of yield points where the lock was actually handed over.
    pub fn yields_taken(&self) -> usize {
        self.yields_taken.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let guard = self.txn_lock.lock().unwrap();
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        guard
    }

    fn note_open(&self) {
        let open = self.open_transactions.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_transactions.fetch_max(open, Ordering::SeqCst);
    }
}

impl TabularStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, BoxedError> {
        let guard = self.acquire();
        self.note_open();
        self.transactions_opened.fetch_add(1, Ordering::SeqCst);
        let working = self.base.lock().unwrap().clone();
        Ok(Box::new(MemoryTransaction {
            store: self,
            guard: Some(guard),
            working,
            log: Vec::new(),
        }))
    }
}

enum WriteOp {
    Insert {
        table: String,
        row_id: i64,
        values: Values,
    },
    Update {
        table: String,
        values: Values,
        selection: Option<String>,
        args: Vec<Value>,
    },
    Delete {
        table: String,
        selection: Option<String>,
        args: Vec<Value>,
    },
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    guard: Option<MutexGuard<'a, ()>>,
    working: Tables,
    // Replayed onto a fresh snapshot when the lock is handed over at a
    // yield point, so work done before the yield is never lost.
    log: Vec<WriteOp>,
}

impl MemoryTransaction<'_> {
    fn replay(&mut self) -> Result<(), BoxedError> {
        for op in &self.log {
            match op {
                WriteOp::Insert {
                    table,
                    row_id,
                    values,
                } => apply_insert(&mut self.working, table, *row_id, values),
                WriteOp::Update {
                    table,
                    values,
                    selection,
                    args,
                } => {
                    apply_update(&mut self.working, table, values, selection.as_deref(), args)?;
                }
                WriteOp::Delete {
                    table,
                    selection,
                    args,
                } => {
                    apply_delete(&mut self.working, table, selection.as_deref(), args)?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        self.store.open_transactions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn insert(&mut self, table: &str, values: &Values) -> Result<i64, BoxedError> {
        let row_id = self.store.next_row_id.fetch_add(1, Ordering::SeqCst) + 1;
        apply_insert(&mut self.working, table, row_id, values);
        self.log.push(WriteOp::Insert {
            table: table.to_string(),
            row_id,
            values: values.clone(),
        });
        Ok(row_id)
    }

    fn update(
        &mut self,
        table: &str,
        values: &Values,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, BoxedError> {
        let affected = apply_update(&mut self.working, table, values, selection, args)?;
        self.log.push(WriteOp::Update {
            table: table.to_string(),
            values: values.clone(),
            selection: selection.map(str::to_string),
            args: args.to_vec(),
        });
        Ok(affected)
    }

    fn delete(
        &mut self,
        table: &str,
        selection: Option<&str>,
        args: &[Value],
    ) -> Result<u64, BoxedError> {
        let affected = apply_delete(&mut self.working, table, selection, args)?;
        self.log.push(WriteOp::Delete {
            table: table.to_string(),
            selection: selection.map(str::to_string),
            args: args.to_vec(),
        });
        Ok(affected)
    }

    fn query(&mut self, spec: &QuerySpec<'_>) -> Result<Rows, BoxedError> {
        if spec.group_by.is_some() || spec.having.is_some() {
            return Err("group by/having are not supported by MemoryStore".into());
        }

        let mut rows: Vec<Row> = match self.working.get(spec.table) {
            Some(table) => table.rows.iter().map(|(_, row)| row.clone()).collect(),
            None => Vec::new(),
        };

        let mut matched = Vec::with_capacity(rows.len());
        for row in rows.drain(..) {
            if selection_matches(spec.selection, spec.args, &row)? {
                matched.push(row);
            }
        }

        if let Some(sort_order) = spec.sort_order {
            sort_rows(&mut matched, sort_order)?;
        }
        if let Some(limit) = spec.limit {
            apply_limit(&mut matched, limit)?;
        }
        if !spec.projection.is_empty() {
            for row in &mut matched {
                row.retain(|column, _| spec.projection.iter().any(|p| p == column));
            }
        }

        Ok(Rows(matched))
    }

    fn raw_query(&mut self, text: &str, _args: &[Value]) -> Result<Rows, BoxedError> {
        match text.strip_prefix("count:") {
            Some(table) => {
                let count = self
                    .working
                    .get(table.trim())
                    .map(|t| t.rows.len())
                    .unwrap_or(0);
                let mut row = Row::new();
                row.insert("count".to_string(), Value::Integer(count as i64));
                Ok(Rows(vec![row]))
            }
            None => Err(format!("unsupported raw query '{text}'").into()),
        }
    }

    fn yield_lock(&mut self, max_wait: Duration) -> Result<bool, BoxedError> {
        if self.store.waiters.load(Ordering::SeqCst) == 0 {
            return Ok(false);
        }

        // Hand the lock to a waiter, bounded by max_wait, then reacquire
        // and rebuild the working copy on top of whatever they committed.
        self.store.open_transactions.fetch_sub(1, Ordering::SeqCst);
        self.guard = None;
        std::thread::sleep(max_wait.min(Duration::from_millis(5)));
        self.guard = Some(self.store.acquire());
        self.store.note_open();

        self.working = self.store.base.lock().unwrap().clone();
        self.replay()?;
        self.store.yields_taken.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn commit(mut self: Box<Self>) -> Result<(), BoxedError> {
        let working = std::mem::take(&mut self.working);
        *self.store.base.lock().unwrap() = working;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), BoxedError> {
        Ok(())
    }
}

fn apply_insert(tables: &mut Tables, table: &str, row_id: i64, values: &Values) {
    tables
        .entry(table.to_string())
        .or_default()
        .rows
        .push((row_id, values.clone()));
}

fn apply_update(
    tables: &mut Tables,
    table: &str,
    values: &Values,
    selection: Option<&str>,
    args: &[Value],
) -> Result<u64, BoxedError> {
    let Some(table) = tables.get_mut(table) else {
        return Ok(0);
    };
    let mut affected = 0u64;
    for (_, row) in &mut table.rows {
        if selection_matches(selection, args, row)? {
            for (column, value) in values {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
    }
    Ok(affected)
}

fn apply_delete(
    tables: &mut Tables,
    table: &str,
    selection: Option<&str>,
    args: &[Value],
) -> Result<u64, BoxedError> {
    let Some(table) = tables.get_mut(table) else {
        return Ok(0);
    };
    let mut affected = 0u64;
    let mut kept = Vec::with_capacity(table.rows.len());
    for (row_id, row) in table.rows.drain(..) {
        if selection_matches(selection, args, &row)? {
            affected += 1;
        } else {
            kept.push((row_id, row));
        }
    }
    table.rows = kept;
    Ok(affected)
}

/// Evaluates a `col = ?` selection (clauses joined with `AND`) against one
/// row, binding `args` positionally.
fn selection_matches(
    selection: Option<&str>,
    args: &[Value],
    row: &Row,
) -> Result<bool, BoxedError> {
    let Some(text) = selection else {
        return Ok(true);
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(true);
    }

    let clauses: Vec<&str> = text.split(" AND ").collect();
    if clauses.len() != args.len() {
        return Err(format!(
            "selection '{text}' expects {} arguments, got {}",
            clauses.len(),
            args.len()
        )
        .into());
    }

    for (clause, arg) in clauses.iter().zip(args) {
        let clause = clause.trim();
        let column = clause
            .strip_suffix("= ?")
            .or_else(|| clause.strip_suffix("=?"))
            .map(str::trim)
            .ok_or_else(|| format!("unsupported selection clause '{clause}'"))?;
        if row.get(column) != Some(arg) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sort_rows(rows: &mut [Row], sort_order: &str) -> Result<(), BoxedError> {
    let mut parts = sort_order.split_whitespace();
    let column = parts.next().ok_or("empty sort order")?;
    let descending = match parts.next() {
        None => false,
        Some(direction) if direction.eq_ignore_ascii_case("asc") => false,
        Some(direction) if direction.eq_ignore_ascii_case("desc") => true,
        Some(direction) => {
            return Err(format!("unsupported sort direction '{direction}'").into());
        }
    };

    rows.sort_by(|a, b| {
        let ordering = compare_values(a.get(column), b.get(column));
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    Ok(())
}

fn apply_limit(rows: &mut Vec<Row>, limit: &str) -> Result<(), BoxedError> {
    let limit = limit.trim();
    let invalid = || format!("invalid limit '{limit}'");
    if let Some((offset, count)) = limit.split_once(',') {
        let offset: usize = offset.trim().parse().map_err(|_| invalid())?;
        let count: usize = count.trim().parse().map_err(|_| invalid())?;
        rows.drain(..offset.min(rows.len()));
        rows.truncate(count);
    } else {
        let count: usize = limit.parse().map_err(|_| invalid())?;
        rows.truncate(count);
    }
    Ok(())
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Real(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b).unwrap_or(CmpOrdering::Equal),
            (Value::Integer(a), Value::Real(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(CmpOrdering::Equal)
            }
            (Value::Real(a), Value::Integer(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(CmpOrdering::Equal)
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (a, b) => type_rank(a).cmp(&type_rank(b)),
        },
    }
}

/// Resolver that creates one [`MemoryStore`] per store name on demand.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        MemoryResolver::default()
    }

    /// The store backing `id`, created on first access. Table-level and
    /// store-level identifiers with the same store name share one store.
    pub fn store(&self, id: &ResourceId) -> Arc<MemoryStore> {
        Arc::clone(
            self.stores
                .lock()
                .unwrap()
                .entry(id.store_name().to_string())
                .or_default(),
        )
    }
}

impl StoreResolver for MemoryResolver {
    fn open(&self, id: &ResourceId) -> Result<Arc<dyn TabularStore>, BoxedError> {
        Ok(self.store(id))
    }
}

/// Resolver whose stores are always unavailable, for failure-path tests.
#[derive(Debug, Default)]
pub struct OfflineResolver;

impl StoreResolver for OfflineResolver {
    fn open(&self, id: &ResourceId) -> Result<Arc<dyn TabularStore>, BoxedError> {
        Err(format!("store '{}' is offline", id.store_name()).into())
    }
}
