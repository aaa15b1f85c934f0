//! # Resource Identifiers
//!
//! A [`ResourceId`] names a logical tabular resource: a whole store, or one
//! table within it. Identifiers are plain values: equality, hashing, and the
//! parent/child relation are all derived from the two name components, so
//! they work as registry keys and observer-matching keys without any global
//! state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a logical resource: a store, optionally narrowed to one table.
///
/// The descendants relation used by observer registration treats the
/// store-level identifier as the parent of every table-level identifier with
/// the same store name.
///
/// ```
/// use rowgate::ResourceId;
///
/// let store = ResourceId::store("contacts");
/// let table = store.table_child("people");
/// assert!(table.is_descendant_of(&store));
/// assert!(!store.is_descendant_of(&table));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    store: String,
    table: Option<String>,
}

impl ResourceId {
    /// Identifier for a whole store.
    pub fn store(name: impl Into<String>) -> Self {
        ResourceId {
            store: name.into(),
            table: None,
        }
    }

    /// Identifier for one table within a store.
    pub fn table(store: impl Into<String>, table: impl Into<String>) -> Self {
        ResourceId {
            store: store.into(),
            table: Some(table.into()),
        }
    }

    /// The identifier of `table` within this identifier's store.
    pub fn table_child(&self, table: impl Into<String>) -> Self {
        ResourceId {
            store: self.store.clone(),
            table: Some(table.into()),
        }
    }

    pub fn store_name(&self) -> &str {
        &self.store
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// The store-level parent of a table-level identifier.
    pub fn parent(&self) -> Option<ResourceId> {
        self.table.as_ref().map(|_| ResourceId {
            store: self.store.clone(),
            table: None,
        })
    }

    /// Whether `self` is a child of `other` in the store/table hierarchy.
    pub fn is_descendant_of(&self, other: &ResourceId) -> bool {
        self.store == other.store && other.table.is_none() && self.table.is_some()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}/{}", self.store, table),
            None => write!(f, "{}", self.store),
        }
    }
}
