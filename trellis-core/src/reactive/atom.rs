//! Atom Implementation
//!
//! An atom is an observable without a value: the owner keeps its data
//! wherever it likes and tells the atom when that data is read or written.
//! Signals are built on atoms, and so is the prop container, which stores
//! many keys behind a single dependency-graph node.

use std::fmt::Debug;
use std::sync::Arc;

use super::runtime::Runtime;
use crate::graph::NodeId;

struct AtomInner {
    id: NodeId,
}

impl Drop for AtomInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A bare observable node.
///
/// Clones share the same node; the node leaves the graph when the last
/// clone is dropped.
#[derive(Clone)]
pub struct Atom {
    inner: Arc<AtomInner>,
}

impl Atom {
    /// Create a new atom with its own graph node.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomInner {
                id: Runtime::add_source(),
            }),
        }
    }

    /// Get the atom's graph node.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Record a read against the current computation, if any.
    pub fn report_observed(&self) {
        Runtime::report_observed(self.inner.id);
    }

    /// Notify every dependent computation that the data changed.
    pub fn report_changed(&self) {
        Runtime::report_changed(self.inner.id);
    }

    /// Number of computations currently observing this atom.
    pub fn observer_count(&self) -> usize {
        Runtime::observer_count(self.inner.id)
    }
}

impl Default for Atom {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.id)
            .field("observers", &self.observer_count())
            .finish()
    }
}
