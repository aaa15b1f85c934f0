use std::sync::Arc;

use rowgate::mock::MemoryResolver;
use rowgate::{
    values, BatchOperation, BatchResult, DispatchError, Dispatcher, ResourceId, Value,
    MAX_OPERATIONS_PER_YIELD_POINT,
};

fn dispatcher() -> (Dispatcher, Arc<MemoryResolver>) {
    let resolver = Arc::new(MemoryResolver::new());
    (Dispatcher::new(resolver.clone()), resolver)
}

#[test]
fn batch_applies_atomically_in_submission_order() {
    let (dispatcher, resolver) = dispatcher();
    let id = ResourceId::store("db");

    let results = dispatcher
        .apply_batch_sync(
            &id,
            vec![
                BatchOperation::insert("people", values([("name", "ada")])),
                BatchOperation::insert("people", values([("name", "grace")])),
                BatchOperation::delete("people")
                    .selection("name = ?", vec![Value::from("ada")]),
            ],
        )
        .unwrap();

    // One result per sub-operation, in submission order.
    assert_eq!(results.len(), 3);
    assert!(matches!(results[0], BatchResult::Inserted(_)));
    assert!(matches!(results[1], BatchResult::Inserted(_)));
    assert_eq!(results[2], BatchResult::Affected(1));

    // The committed state is what sequential application produces.
    let store = resolver.store(&id);
    let rows = store.rows("people");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("grace")));
}

#[test]
fn failing_sub_operation_rolls_back_the_whole_batch() {
    let (dispatcher, resolver) = dispatcher();
    let id = ResourceId::store("db");
    dispatcher
        .insert_sync(&id, "people", values([("name", "ada")]))
        .unwrap();

    let error = dispatcher
        .apply_batch_sync(
            &id,
            vec![
                BatchOperation::insert("people", values([("name", "grace")])),
                // The in-memory store rejects non-equality selections, so
                // this sub-operation fails after the first one succeeded.
                BatchOperation::delete("people")
                    .selection("name LIKE ?", vec![Value::from("a%")]),
            ],
        )
        .unwrap_err();
    assert!(matches!(error, DispatchError::OperationFailure { .. }));

    // Nothing from the batch is visible.
    let store = resolver.store(&id);
    assert_eq!(store.row_count("people"), 1);
}

#[test]
fn batch_opens_exactly_one_transaction() {
    let (dispatcher, resolver) = dispatcher();
    let id = ResourceId::store("db");
    let store = resolver.store(&id);

    let operations = (0..10)
        .map(|i| BatchOperation::insert("people", values([("n", i)])))
        .collect();
    dispatcher.apply_batch_sync(&id, operations).unwrap();

    // Nested sub-operations reused the outer transaction instead of
    // opening their own.
    assert_eq!(store.transactions_opened(), 1);
    assert_eq!(store.max_open_transactions(), 1);
    assert_eq!(store.row_count("people"), 10);
}

#[test]
fn batch_without_yield_points_overflows_past_the_ceiling() {
    let (dispatcher, resolver) = dispatcher();
    let id = ResourceId::store("db");

    let operations: Vec<_> = (0..=MAX_OPERATIONS_PER_YIELD_POINT as i64)
        .map(|i| BatchOperation::insert("people", values([("n", i)])))
        .collect();
    assert_eq!(operations.len(), MAX_OPERATIONS_PER_YIELD_POINT + 1);

    let error = dispatcher.apply_batch_sync(&id, operations).unwrap_err();
    match error {
        DispatchError::BatchOverflow {
            limit,
            yield_points,
        } => {
            assert_eq!(limit, MAX_OPERATIONS_PER_YIELD_POINT);
            assert_eq!(yield_points, 0);
        }
        other => panic!("expected BatchOverflow, got {other:?}"),
    }

    // The overflow aborted the whole transaction.
    let store = resolver.store(&id);
    assert_eq!(store.row_count("people"), 0);
}

#[test]
fn yield_allowed_operations_keep_a_long_batch_under_the_ceiling() {
    let (dispatcher, resolver) = dispatcher();
    let id = ResourceId::store("db");

    let count = MAX_OPERATIONS_PER_YIELD_POINT + 1;
    let operations: Vec<_> = (0..count as i64)
        .map(|i| {
            let operation = BatchOperation::insert("people", values([("n", i)]));
            if i > 0 && i % 500 == 0 {
                operation.allow_yield()
            } else {
                operation
            }
        })
        .collect();

    let results = dispatcher.apply_batch_sync(&id, operations).unwrap();
    assert_eq!(results.len(), count);

    let store = resolver.store(&id);
    assert_eq!(store.row_count("people"), count);
    // No other transaction was waiting, so the lock was never handed over.
    assert_eq!(store.yields_taken(), 0);
}

#[test]
fn batch_ceiling_is_inclusive() {
    let (dispatcher, resolver) = dispatcher();
    let id = ResourceId::store("db");

    // Exactly the ceiling is still allowed.
    let operations: Vec<_> = (0..MAX_OPERATIONS_PER_YIELD_POINT as i64)
        .map(|i| BatchOperation::insert("people", values([("n", i)])))
        .collect();
    dispatcher.apply_batch_sync(&id, operations).unwrap();

    let store = resolver.store(&id);
    assert_eq!(store.row_count("people"), MAX_OPERATIONS_PER_YIELD_POINT);
}

#[test]
fn mixed_batch_reports_per_operation_results() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");

    let results = dispatcher
        .apply_batch_sync(
            &id,
            vec![
                BatchOperation::insert(
                    "people",
                    values([("name", Value::from("ada")), ("seen", Value::from(false))]),
                ),
                BatchOperation::insert(
                    "people",
                    values([("name", Value::from("grace")), ("seen", Value::from(false))]),
                ),
                BatchOperation::update("people", values([("seen", true)])),
                BatchOperation::delete("people")
                    .selection("name = ?", vec![Value::from("nobody")]),
            ],
        )
        .unwrap();

    assert_eq!(results.len(), 4);
    assert!(matches!(results[0], BatchResult::Inserted(_)));
    assert!(matches!(results[1], BatchResult::Inserted(_)));
    assert_eq!(results[2], BatchResult::Affected(2));
    assert_eq!(results[3], BatchResult::Affected(0));
}
