//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation inside a tracking
//!    context and caches the result.
//!
//! 2. When accessed again with no dependency changed, it returns the cache.
//!
//! 3. When a dependency changes, the runtime marks the memo dirty.
//!
//! 4. The next access recomputes and re-tracks.
//!
//! A memo is itself observable: computations reading it depend on it, and
//! the runtime propagates source changes through it to them.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::{Reactive, Runtime};
use crate::graph::NodeId;

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// The memo needs to recompute on next access.
    Dirty,
}

struct MemoInner<T> {
    id: NodeId,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    state: RwLock<MemoState>,
    compute_count: RwLock<usize>,
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn mark_stale(&self) {
        *self.state.write() = MemoState::Dirty;
    }

    fn schedule(&self) {}

    fn is_eager(&self) -> bool {
        false
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            id: NodeId::new(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(MemoState::Dirty),
            compute_count: RwLock::new(0),
        });
        let reactive: Arc<dyn Reactive> = inner.clone();
        Runtime::register(&reactive);
        Self { inner }
    }

    /// Get the memo's graph node.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        Runtime::report_observed(self.inner.id);

        let state = *self.inner.state.read();
        if state == MemoState::Clean {
            if let Some(value) = self.inner.value.read().clone() {
                return value;
            }
        }
        self.recompute()
    }

    /// Mark the memo as needing recomputation.
    pub fn mark_dirty(&self) {
        self.inner.mark_stale();
    }

    fn recompute(&self) -> T {
        let (new_value, deps) = {
            let _ctx = ReactiveContext::enter(self.inner.id);
            let value = (self.inner.compute)();
            (value, ReactiveContext::reads())
        };

        Runtime::commit_dependencies(self.inner.id, &deps);

        *self.inner.value.write() = Some(new_value.clone());
        *self.inner.state.write() = MemoState::Clean;
        *self.inner.compute_count.write() += 1;

        new_value
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.read()
    }

    /// Number of times the computation has run.
    pub fn compute_count(&self) -> usize {
        *self.inner.compute_count.read()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .finish()
    }
}
