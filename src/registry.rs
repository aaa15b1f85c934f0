//! # Worker Registry
//!
//! Maps each [`ResourceId`] to its single [`ResourceWorker`], creating
//! workers lazily on first access. The map is guarded by a lock and
//! populated with an atomic get-or-insert, so concurrent first accesses for
//! the same identifier still construct exactly one worker. There is no
//! eviction; workers persist for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::batch::BatchApplier;
use crate::notifier::ChangeNotifier;
use crate::resource::ResourceId;
use crate::store::StoreResolver;
use crate::worker::ResourceWorker;

/// Lazily-populated map of resource identifier to worker.
pub struct WorkerRegistry {
    resolver: Arc<dyn StoreResolver>,
    notifier: Arc<ChangeNotifier>,
    batch: BatchApplier,
    workers: Mutex<HashMap<ResourceId, Arc<ResourceWorker>>>,
}

impl WorkerRegistry {
    pub fn new(
        resolver: Arc<dyn StoreResolver>,
        notifier: Arc<ChangeNotifier>,
        batch: BatchApplier,
    ) -> Self {
        WorkerRegistry {
            resolver,
            notifier,
            batch,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the worker for `id`, creating it on first access.
    ///
    /// The check-then-create runs under the map lock, so two racing callers
    /// always observe the same worker instance.
    pub fn worker(&self, id: &ResourceId) -> Arc<ResourceWorker> {
        let mut workers = self.workers.lock().unwrap();
        Arc::clone(workers.entry(id.clone()).or_insert_with(|| {
            info!(resource = %id, "worker created");
            Arc::new(ResourceWorker::new(
                id.clone(),
                Arc::clone(&self.resolver),
                Arc::clone(&self.notifier),
                self.batch,
            ))
        }))
    }

    /// Number of workers created so far.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }
}
