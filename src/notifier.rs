//! # Change Notification
//!
//! Decouples "resources were modified" from "observers were told". During a
//! transaction the worker marks every touched resource in a transaction-
//! scoped [`ChangeSet`]; strictly after a successful commit the set is
//! flushed through the [`ChangeNotifier`], which fans each identifier out to
//! the observers registered for it. A rolled-back transaction simply drops
//! its set, so observers never hear about discarded writes.
//!
//! Observer dispatch is best-effort: a failing observer is logged and
//! skipped, and never fails the data operation that triggered it. This is
//! the only place the facade deliberately absorbs an error.

use std::collections::HashSet;
use std::mem;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::resource::ResourceId;
use crate::store::BoxedError;

/// Receives change notifications for registered resources.
pub trait Observer: Send + Sync {
    fn on_changed(&self, id: &ResourceId) -> Result<(), BoxedError>;
}

/// The set of resources modified within one transaction, pending
/// notification.
///
/// Created at transaction start, drained atomically at flush. The lock
/// guards only the small insert/drain operations and is never held across
/// store I/O or observer dispatch.
#[derive(Debug, Default)]
pub struct ChangeSet {
    ids: Mutex<HashSet<ResourceId>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        ChangeSet::default()
    }

    /// Records a touched resource. Duplicates are deduplicated.
    pub fn mark(&self, id: ResourceId) {
        self.ids.lock().unwrap().insert(id);
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().unwrap().is_empty()
    }

    /// Atomically swaps the accumulated set for an empty one.
    fn drain(&self) -> HashSet<ResourceId> {
        mem::take(&mut *self.ids.lock().unwrap())
    }
}

struct Registration {
    id: ResourceId,
    descendants: bool,
    observer: Arc<dyn Observer>,
}

/// Observer registry and post-commit notification fan-out.
#[derive(Default)]
pub struct ChangeNotifier {
    registrations: Mutex<Vec<Registration>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        ChangeNotifier::default()
    }

    /// Registers `observer` for changes to `id`.
    ///
    /// With `notify_for_descendants` set, a store-level registration also
    /// receives notifications for every table identifier under that store.
    pub fn register(
        &self,
        id: ResourceId,
        notify_for_descendants: bool,
        observer: Arc<dyn Observer>,
    ) {
        debug!(resource = %id, descendants = notify_for_descendants, "observer registered");
        self.registrations.lock().unwrap().push(Registration {
            id,
            descendants: notify_for_descendants,
            observer,
        });
    }

    /// Removes every registration of `observer`, across all identifiers.
    pub fn unregister(&self, observer: &Arc<dyn Observer>) {
        self.registrations
            .lock()
            .unwrap()
            .retain(|registration| !Arc::ptr_eq(&registration.observer, observer));
    }

    /// Drains `changes` and notifies the observers registered for each
    /// drained identifier. Called exactly once per transaction, strictly
    /// after a successful commit.
    pub fn flush(&self, changes: &ChangeSet) {
        let changed = changes.drain();
        if changed.is_empty() {
            return;
        }

        for id in changed {
            // Snapshot the matching observers so the registry lock is not
            // held across observer dispatch.
            let matching: Vec<Arc<dyn Observer>> = self
                .registrations
                .lock()
                .unwrap()
                .iter()
                .filter(|registration| {
                    registration.id == id
                        || (registration.descendants && id.is_descendant_of(&registration.id))
                })
                .map(|registration| Arc::clone(&registration.observer))
                .collect();

            debug!(resource = %id, observers = matching.len(), "change flushed");
            for observer in matching {
                if let Err(error) = observer.on_changed(&id) {
                    warn!(resource = %id, %error, "observer failed; skipping");
                }
            }
        }
    }
}
