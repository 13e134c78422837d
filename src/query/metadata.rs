//! Collection resolution bridging names in the query to catalog handles.
//!
//! The planner never validates collection names itself. It asks a
//! [`CollectionCatalog`] and records every collection it touched, with the
//! strongest access mode seen, so the serialized plan can tell the receiving
//! process which collections to lock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::errors::{PlanError, Result};

/// Access intent for a collection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Rows are only read.
    Read,
    /// Rows are inserted, updated, replaced, or removed.
    Write,
}

impl AccessMode {
    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved collection handle.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Collection {
    /// Collection name.
    pub name: String,
    /// Catalog identifier.
    pub id: u64,
}

/// Resolves collection names for the planner.
pub trait CollectionCatalog {
    /// Resolves `name` for the given access intent.
    fn resolve_collection(&self, name: &str, mode: AccessMode) -> Result<Collection>;
}

/// Simple in-memory catalog used for tests or prototyping.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    collections: HashMap<String, u64>,
    read_only: HashMap<String, bool>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a writable collection.
    pub fn with_collection(mut self, name: impl Into<String>, id: u64) -> Self {
        let name = name.into();
        self.read_only.insert(name.clone(), false);
        self.collections.insert(name, id);
        self
    }

    /// Registers a collection that rejects write intent.
    pub fn with_read_only_collection(mut self, name: impl Into<String>, id: u64) -> Self {
        let name = name.into();
        self.read_only.insert(name.clone(), true);
        self.collections.insert(name, id);
        self
    }
}

impl CollectionCatalog for InMemoryCatalog {
    fn resolve_collection(&self, name: &str, mode: AccessMode) -> Result<Collection> {
        let id = self
            .collections
            .get(name)
            .copied()
            .ok_or_else(|| PlanError::UnknownCollection {
                name: name.to_owned(),
                context: "catalog lookup",
            })?;
        if mode == AccessMode::Write && self.read_only.get(name).copied().unwrap_or(false) {
            return Err(PlanError::ReadOnlyCollection {
                name: name.to_owned(),
                context: "catalog lookup",
            });
        }
        Ok(Collection {
            name: name.to_owned(),
            id,
        })
    }
}

/// Collections referenced by one plan, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsedCollections {
    entries: BTreeMap<String, AccessMode>,
}

impl UsedCollections {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a use; write access wins over read access.
    pub fn add(&mut self, name: impl Into<String>, mode: AccessMode) {
        let entry = self.entries.entry(name.into()).or_insert(mode);
        if mode > *entry {
            *entry = mode;
        }
    }

    /// Access mode recorded for `name`.
    pub fn get(&self, name: &str) -> Option<AccessMode> {
        self.entries.get(name).copied()
    }

    /// Returns true if `name` was recorded.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates `(name, mode)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, AccessMode)> {
        self.entries.iter().map(|(name, mode)| (name.as_str(), *mode))
    }

    /// Number of recorded collections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
