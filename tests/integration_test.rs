use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rowgate::mock::{MemoryResolver, OfflineResolver};
use rowgate::{
    values, AsyncOps, BatchOperation, CallbackContext, DispatchError, Dispatcher, OperationKind,
    Request, RequestBuilder, ResourceId, Response, Rows, Value,
};

fn dispatcher() -> (Dispatcher, Arc<MemoryResolver>) {
    let resolver = Arc::new(MemoryResolver::new());
    (Dispatcher::new(resolver.clone()), resolver)
}

// --- Synchronous dispatch ---

#[test]
fn round_trip_insert_then_query() {
    let (dispatcher, _) = dispatcher();
    let contacts = ResourceId::store("contacts");

    dispatcher
        .insert_sync(&contacts, "people", values([("name", "ada")]))
        .unwrap();

    let request = Request::builder()
        .operation(OperationKind::Query)
        .table("people")
        .selection("name = ?")
        .selection_arg("ada")
        .build()
        .unwrap();
    let rows = dispatcher
        .dispatch_sync(&contacts, request)
        .unwrap()
        .into_query_value()
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows.first().unwrap().get("name"), Some(&Value::from("ada")));
}

#[test]
fn response_tag_matches_operation_kind() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");

    let cases: Vec<(OperationKind, RequestBuilder)> = vec![
        (
            OperationKind::Insert,
            Request::builder()
                .operation(OperationKind::Insert)
                .table("t")
                .value("a", 1),
        ),
        (
            OperationKind::Query,
            Request::builder().operation(OperationKind::Query).table("t"),
        ),
        (
            OperationKind::Update,
            Request::builder()
                .operation(OperationKind::Update)
                .table("t")
                .value("a", 2),
        ),
        (
            OperationKind::Delete,
            Request::builder().operation(OperationKind::Delete).table("t"),
        ),
        (
            OperationKind::ApplyBatch,
            Request::builder()
                .operation(OperationKind::ApplyBatch)
                .batch_operation(BatchOperation::insert("t", values([("a", 3)]))),
        ),
    ];

    for (kind, builder) in cases {
        let response = dispatcher
            .dispatch_sync(&id, builder.build().unwrap())
            .unwrap();
        assert_eq!(response.kind(), kind);
    }
}

#[test]
fn update_and_delete_report_affected_counts() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");

    for name in ["ada", "grace", "ada"] {
        dispatcher
            .insert_sync(
                &id,
                "people",
                values([("name", Value::from(name)), ("seen", Value::from(false))]),
            )
            .unwrap();
    }

    let updated = dispatcher
        .update_sync(
            &id,
            "people",
            values([("seen", true)]),
            Some("name = ?"),
            &[Value::from("ada")],
        )
        .unwrap();
    assert_eq!(updated, 2);

    let deleted = dispatcher
        .delete_sync(&id, "people", Some("name = ?"), &[Value::from("grace")])
        .unwrap();
    assert_eq!(deleted, 1);

    let missing = dispatcher
        .delete_sync(&id, "people", Some("name = ?"), &[Value::from("edsger")])
        .unwrap();
    assert_eq!(missing, 0);
}

#[test]
fn raw_query_bypasses_structured_building() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");
    dispatcher
        .insert_sync(&id, "people", values([("name", "ada")]))
        .unwrap();

    let request = Request::builder()
        .operation(OperationKind::Query)
        .table("people")
        .raw_query(true)
        .selection("count:people")
        .build()
        .unwrap();
    let rows = dispatcher
        .dispatch_sync(&id, request)
        .unwrap()
        .into_query_value()
        .unwrap();
    assert_eq!(rows.first().unwrap().get("count"), Some(&Value::Integer(1)));
}

#[test]
fn converter_maps_rows_before_commit() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");
    dispatcher
        .insert_sync(&id, "people", values([("name", "ada")]))
        .unwrap();

    let request = Request::builder()
        .operation(OperationKind::Query)
        .table("people")
        .converter(|rows: Rows| -> Result<Vec<String>, rowgate::BoxedError> {
            Ok(rows
                .iter()
                .filter_map(|row| match row.get("name") {
                    Some(Value::Text(name)) => Some(name.clone()),
                    _ => None,
                })
                .collect::<Vec<String>>())
        })
        .build()
        .unwrap();

    let names = dispatcher
        .dispatch_sync(&id, request)
        .unwrap()
        .into_query_value()
        .unwrap();
    assert_eq!(names, vec!["ada".to_string()]);
}

#[test]
fn converter_failure_surfaces_and_rolls_back() {
    let (dispatcher, resolver) = dispatcher();
    let id = ResourceId::store("db");
    let store = resolver.store(&id);

    let request = Request::builder()
        .operation(OperationKind::Query)
        .table("people")
        .converter(|_rows: Rows| -> Result<Rows, rowgate::BoxedError> {
            Err("cannot decode".into())
        })
        .build()
        .unwrap();

    let error = dispatcher.dispatch_sync(&id, request).unwrap_err();
    assert!(matches!(error, DispatchError::ConverterFailure(_)));
    // The transaction was opened and closed without publishing anything.
    assert_eq!(store.transactions_opened(), 1);
    assert_eq!(store.row_count("people"), 0);
}

#[test]
fn store_unavailable_fails_the_request() {
    let dispatcher = Dispatcher::new(Arc::new(OfflineResolver));
    let id = ResourceId::store("db");

    let error = dispatcher
        .insert_sync(&id, "people", values([("name", "ada")]))
        .unwrap_err();
    assert!(matches!(error, DispatchError::StoreUnavailable(_)));
}

// --- Request validation ---

#[test]
fn builder_rejects_malformed_requests() {
    // No operation kind.
    let error = Request::builder().table("t").build().unwrap_err();
    assert!(matches!(error, DispatchError::InvalidRequest(_)));

    // Missing table for a non-batch operation.
    let error = Request::builder()
        .operation(OperationKind::Query)
        .build()
        .unwrap_err();
    assert!(matches!(error, DispatchError::InvalidRequest(_)));

    // Insert without values.
    let error = Request::builder()
        .operation(OperationKind::Insert)
        .table("t")
        .build()
        .unwrap_err();
    assert!(matches!(error, DispatchError::InvalidRequest(_)));

    // Raw query without query text.
    let error = Request::builder()
        .operation(OperationKind::Query)
        .table("t")
        .raw_query(true)
        .build()
        .unwrap_err();
    assert!(matches!(error, DispatchError::InvalidRequest(_)));

    // Raw flag on a write.
    let error = Request::builder()
        .operation(OperationKind::Delete)
        .table("t")
        .raw_query(true)
        .selection("text")
        .build()
        .unwrap_err();
    assert!(matches!(error, DispatchError::InvalidRequest(_)));

    // Empty batch.
    let error = Request::builder()
        .operation(OperationKind::ApplyBatch)
        .build()
        .unwrap_err();
    assert!(matches!(error, DispatchError::InvalidRequest(_)));

    // Batch operations attached to a single-operation request.
    let error = Request::builder()
        .operation(OperationKind::Insert)
        .table("t")
        .value("a", 1)
        .batch_operation(BatchOperation::insert("t", values([("a", 1)])))
        .build()
        .unwrap_err();
    assert!(matches!(error, DispatchError::InvalidRequest(_)));
}

// --- Registry & concurrency ---

#[test]
fn registry_creates_one_worker_per_resource() {
    let (dispatcher, _) = dispatcher();
    let dispatcher = Arc::new(dispatcher);
    let id = ResourceId::store("db");

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            let id = id.clone();
            std::thread::spawn(move || {
                dispatcher
                    .insert_sync(&id, "people", values([("n", i)]))
                    .unwrap();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(dispatcher.worker_count(), 1);
}

#[test]
fn concurrent_writes_never_overlap_transactions() {
    let (dispatcher, resolver) = dispatcher();
    let dispatcher = Arc::new(dispatcher);
    let id = ResourceId::store("db");
    let store = resolver.store(&id);

    let writers = 8;
    let threads: Vec<_> = (0..writers)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            let id = id.clone();
            std::thread::spawn(move || {
                dispatcher
                    .insert_sync(&id, "counters", values([("writer", i as i64)]))
                    .unwrap();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    // Every effect landed and the store's transaction lock was never held
    // by two transactions at once.
    assert_eq!(store.row_count("counters"), writers);
    assert_eq!(store.max_open_transactions(), 1);
}

// --- Asynchronous dispatch ---

#[tokio::test(flavor = "multi_thread")]
async fn async_dispatch_delivers_response_through_callback() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");
    let (sender, receiver) = tokio::sync::oneshot::channel();

    let request = Request::builder()
        .operation(OperationKind::Insert)
        .table("people")
        .value("name", "ada")
        .on_complete(move |outcome| {
            let _ = sender.send(outcome);
        })
        .build()
        .unwrap();

    let handle = dispatcher.dispatch_async(&id, request);
    let outcome = receiver.await.unwrap();
    handle.join().await;

    let row_id = outcome.unwrap().row_id().unwrap();
    assert!(row_id > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_ops_trait_mirrors_sync_surface() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");

    let row_id = dispatcher
        .insert(&id, "people", values([("name", "ada")]))
        .await
        .unwrap();
    assert!(row_id > 0);

    let updated = dispatcher
        .update(
            &id,
            "people",
            values([("name", "lovelace")]),
            Some("name = ?"),
            &[Value::from("ada")],
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let results = dispatcher
        .apply_batch(
            &id,
            vec![BatchOperation::insert(
                "people",
                values([("name", "grace")]),
            )],
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let deleted = dispatcher.delete(&id, "people", None, &[]).await.unwrap();
    assert_eq!(deleted, 2);
}

#[test]
fn cancellation_before_start_reports_cancelled() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(1)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let (dispatcher, resolver) = dispatcher();
        let id = ResourceId::store("db");
        let store = resolver.store(&id);

        // Occupy the only blocking thread so the dispatch stays queued.
        let blocker = tokio::task::spawn_blocking(|| {
            std::thread::sleep(Duration::from_millis(200));
        });

        let (sender, receiver) = tokio::sync::oneshot::channel();
        let request = Request::builder()
            .operation(OperationKind::Insert)
            .table("people")
            .value("name", "ada")
            .on_complete(move |outcome| {
                let _ = sender.send(outcome);
            })
            .build()
            .unwrap();

        let handle = dispatcher.dispatch_async(&id, request);
        handle.cancel();

        let outcome = receiver.await.unwrap();
        assert!(matches!(outcome, Err(DispatchError::Cancelled)));
        handle.join().await;
        blocker.await.unwrap();

        // The cancelled request never opened a transaction.
        assert_eq!(store.transactions_opened(), 0);
        assert_eq!(store.row_count("people"), 0);
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn callbacks_marshal_to_the_designated_context() {
    let (context, runner) = CallbackContext::channel();
    let resolver = Arc::new(MemoryResolver::new());
    let dispatcher = Dispatcher::new(resolver).callback_context(context);
    let id = ResourceId::store("db");

    let callback_thread = Arc::new(std::sync::Mutex::new(None));
    let seen = Arc::clone(&callback_thread);
    let (sender, receiver) = tokio::sync::oneshot::channel();

    let request = Request::builder()
        .operation(OperationKind::Insert)
        .table("people")
        .value("name", "ada")
        .deliver_on_callback_context(true)
        .on_complete(move |outcome| {
            *seen.lock().unwrap() = Some(std::thread::current().id());
            let _ = sender.send(outcome);
        })
        .build()
        .unwrap();

    let handle = dispatcher.dispatch_async(&id, request);
    handle.join().await;
    // Execution finished, but the callback is parked on the context queue
    // until a runner drains it.
    assert!(callback_thread.lock().unwrap().is_none());

    let runner_thread = std::thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(runner.run());
    });

    let outcome = receiver.await.unwrap();
    assert!(outcome.unwrap().row_id().is_some());
    assert!(callback_thread.lock().unwrap().is_some());
    assert_ne!(
        *callback_thread.lock().unwrap(),
        Some(std::thread::current().id())
    );

    drop(dispatcher);
    runner_thread.join().unwrap();
}

#[test]
fn sync_dispatch_ignores_completion_callbacks() {
    let (dispatcher, _) = dispatcher();
    let id = ResourceId::store("db");
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let request = Request::builder()
        .operation(OperationKind::Insert)
        .table("people")
        .value("name", "ada")
        .on_complete(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let response = dispatcher.dispatch_sync(&id, request).unwrap();
    assert!(matches!(response, Response::Inserted(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
