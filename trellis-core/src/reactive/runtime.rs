//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects atoms, memos, and
//! reactions. It owns the dependency graph and schedules reactions when
//! observables change.
//!
//! # How It Works
//!
//! 1. Every observable and computation owns a node in the graph.
//!
//! 2. When a computation finishes tracking, the runtime replaces its
//!    incoming edges with the observables it read.
//!
//! 3. When an observable changes, the runtime:
//!    a. Finds all transitive dependents in topological order
//!    b. Marks memos stale (they recompute lazily on next read)
//!    c. Queues reactions
//!    d. Flushes the queue, unless a transaction is open
//!
//! # Thread Safety
//!
//! The graph and registry are process-wide behind `parking_lot` locks; the
//! tracking context and the batch queue are thread-local. Locks are never
//! held while user code runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};

use super::context::ReactiveContext;
use crate::graph::{Node, NodeId, NodeKind, UpdateScheduler};

/// Maximum number of flush passes before a reaction cycle is declared
/// non-converging.
pub const MAX_FLUSH_PASSES: usize = 100;

/// A trait for computations that can be notified when dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the graph node of this computation.
    fn node_id(&self) -> NodeId;

    /// Mark the cached value as stale (memos).
    fn mark_stale(&self);

    /// Run the computation's invalidation handler (reactions).
    fn schedule(&self);

    /// Whether this is a reaction (eager) or a memo (lazy). Read once, when
    /// the computation registers.
    fn is_eager(&self) -> bool;
}

/// The global reactive runtime.
pub struct Runtime;

static GRAPH: OnceLock<Mutex<UpdateScheduler>> = OnceLock::new();
static REGISTRY: OnceLock<RwLock<HashMap<NodeId, Weak<dyn Reactive>>>> = OnceLock::new();

fn graph() -> &'static Mutex<UpdateScheduler> {
    GRAPH.get_or_init(|| Mutex::new(UpdateScheduler::new()))
}

fn registry() -> &'static RwLock<HashMap<NodeId, Weak<dyn Reactive>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    flushing: bool,
    pending: IndexSet<NodeId>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Closes one batch level when dropped.
struct BatchGuard;

impl BatchGuard {
    fn open() -> Self {
        BATCH.with(|b| b.borrow_mut().depth += 1);
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outermost = BATCH.with(|b| {
            let mut b = b.borrow_mut();
            b.depth -= 1;
            b.depth == 0
        });
        if outermost && !std::thread::panicking() {
            Runtime::flush();
        }
    }
}

/// Resets the flushing flag even if a reaction panics.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        BATCH.with(|b| b.borrow_mut().flushing = false);
    }
}

impl Runtime {
    /// Allocate a graph node for an observable source.
    pub fn add_source() -> NodeId {
        graph().lock().add_node(Node::source())
    }

    /// Register a computation with the runtime.
    ///
    /// The computation must call [`Runtime::unregister`] from its `Drop`.
    pub fn register(reactive: &Arc<dyn Reactive>) {
        let id = reactive.node_id();
        let kind = if reactive.is_eager() {
            NodeKind::Reaction
        } else {
            NodeKind::Derived
        };
        graph().lock().add_node(Node::new(id, kind));
        registry().write().insert(id, Arc::downgrade(reactive));
    }

    /// Remove a node and every edge touching it.
    pub fn unregister(id: NodeId) {
        graph().lock().remove_node(id);
        registry().write().remove(&id);
    }

    /// Record that the current computation read `source`.
    pub fn report_observed(source: NodeId) {
        ReactiveContext::record_read(source);
    }

    /// Replace the dependency edges of `node` after it finished tracking.
    pub fn commit_dependencies(node: NodeId, dependencies: &[NodeId]) {
        graph()
            .lock()
            .set_dependencies(node, dependencies.iter().copied());
    }

    /// Drop all dependency edges of `node`.
    pub fn clear_dependencies(node: NodeId) {
        graph().lock().clear_dependencies(node);
    }

    /// Notify the runtime that `source` changed.
    ///
    /// This is the core update propagation mechanism.
    pub fn report_changed(source: NodeId) {
        let affected = graph().lock().mark_changed(source);
        if affected.is_empty() {
            return;
        }

        let mut stale: Vec<Arc<dyn Reactive>> = Vec::new();
        {
            let registry = registry().read();
            for (id, kind) in &affected {
                match kind {
                    NodeKind::Derived => {
                        stale.extend(registry.get(id).and_then(Weak::upgrade));
                    }
                    NodeKind::Reaction => BATCH.with(|b| {
                        b.borrow_mut().pending.insert(*id);
                    }),
                    NodeKind::Source => {}
                }
            }
        }
        for memo in stale {
            memo.mark_stale();
        }

        let idle = BATCH.with(|b| {
            let b = b.borrow();
            b.depth == 0 && !b.flushing
        });
        if idle {
            Runtime::flush();
        }
    }

    /// Run `f` as one batch: reactions scheduled inside it run once, after
    /// the outermost batch closes.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        let _guard = BatchGuard::open();
        f()
    }

    /// Check whether a batch is currently open on this thread.
    pub fn in_batch() -> bool {
        BATCH.with(|b| b.borrow().depth > 0)
    }

    /// Run all queued reactions until the queue is empty.
    pub fn flush() {
        let already = BATCH.with(|b| {
            let mut b = b.borrow_mut();
            std::mem::replace(&mut b.flushing, true)
        });
        if already {
            return;
        }
        let _guard = FlushGuard;

        for _ in 0..MAX_FLUSH_PASSES {
            let pending = BATCH.with(|b| std::mem::take(&mut b.borrow_mut().pending));
            if pending.is_empty() {
                return;
            }
            for id in pending {
                let reactive = registry().read().get(&id).and_then(Weak::upgrade);
                if let Some(reactive) = reactive {
                    reactive.schedule();
                }
            }
        }

        let stuck = BATCH.with(|b| std::mem::take(&mut b.borrow_mut().pending));
        tracing::error!(
            passes = MAX_FLUSH_PASSES,
            remaining = stuck.len(),
            "reactions did not converge; dropping the remaining queue"
        );
    }

    /// Number of computations currently depending on `node`.
    pub fn observer_count(node: NodeId) -> usize {
        graph()
            .lock()
            .get_node(node)
            .map(|n| n.readers().len())
            .unwrap_or(0)
    }

    /// Number of observables `node` currently depends on.
    pub fn dependency_count(node: NodeId) -> usize {
        graph()
            .lock()
            .get_node(node)
            .map(|n| n.inputs().len())
            .unwrap_or(0)
    }

    /// Whether `node` is still part of the graph.
    pub fn is_registered(node: NodeId) -> bool {
        graph().lock().contains(node)
    }

    /// Get the computation currently being tracked, if any.
    pub fn current_computation() -> Option<NodeId> {
        ReactiveContext::current()
    }

    /// Check if we're inside a tracking context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
